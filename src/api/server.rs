//! HTTP server setup: router and route wiring (`spec.md` §4.9/§6),
//! shaped after the teacher's `api::server::start_http_server` — bind,
//! build a router, `axum::serve` with graceful shutdown — trimmed to the
//! admission webhook and two health probes. No TLS, no auth, no static
//! asset serving: those stay external per `spec.md` §1.

use crate::admission::{AdmissionAdapter, AdmissionReview};
use crate::policy::PolicyEvaluator;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for the admission/health routes.
pub struct AppState {
    pub evaluator: Arc<PolicyEvaluator>,
    /// Flips true once the config watcher's mandatory initial load has
    /// completed (`spec.md` §4.6: "Initial load is mandatory before the
    /// Policy evaluator accepts traffic.").
    pub ready: AtomicBool,
}

impl AppState {
    pub fn new(evaluator: Arc<PolicyEvaluator>) -> Self {
        Self {
            evaluator,
            ready: AtomicBool::new(false),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    bind: SocketAddr,
    state: Arc<AppState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "admission HTTP surface listening");

    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "admission HTTP surface exited with error");
        }
    });

    Ok(handle)
}

async fn validate(State(state): State<Arc<AppState>>, Json(review): Json<AdmissionReview>) -> Response {
    let uid = review.request.uid.clone();
    let request = match AdmissionAdapter::to_request(&review) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting unparseable admission review");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    let decision = state
        .evaluator
        .evaluate_with_deadline(request, std::time::Duration::from_millis(500))
        .await;
    Json(AdmissionAdapter::to_response(&uid, &decision)).into_response()
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
