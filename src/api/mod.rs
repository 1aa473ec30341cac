//! Minimal HTTP surface (C11): the admission webhook endpoint plus
//! health/readiness probes. Everything else the spec calls external —
//! TLS termination, auth, the REST management API, the web UI — is out
//! of scope and lives outside this crate.

pub mod server;

pub use server::{build_router, AppState};
