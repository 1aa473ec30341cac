//! Process-level boot settings, loaded once at startup from the
//! environment: env-first, with a data-directory default from `dirs`.
//!
//! These are distinct from `config::Configuration` (C5): that is the
//! hot-reloaded policy snapshot; this is what the process needs before
//! it can even start watching for one.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8443";
const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Boot-time settings for the `kubefreezer` process.
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory (PID file, unix socket) — separate from the
    /// watched config object files.
    pub state_dir: PathBuf,
    /// Address the admission/health HTTP surface binds to.
    pub bind_addr: String,
    /// Path to the watched config-object JSON file.
    pub config_path: PathBuf,
    /// Path to the watched schedule-list JSON file.
    pub schedules_path: PathBuf,
    /// Bounded history ring capacity (`spec.md` §3, default 1000).
    pub history_capacity: usize,
    pub log_verbosity: String,
}

impl Settings {
    /// Load from the environment, falling back to documented defaults.
    pub fn load() -> Result<Self> {
        let state_dir = dirs::data_dir()
            .map(|dir| dir.join("kubefreezer"))
            .unwrap_or_else(|| PathBuf::from("./data"));

        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create state directory: {}", state_dir.display()))?;

        let bind_addr =
            std::env::var("KUBEFREEZER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let config_path = std::env::var("KUBEFREEZER_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("config.json"));

        let schedules_path = std::env::var("KUBEFREEZER_SCHEDULES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("schedules.json"));

        let history_capacity = match std::env::var("KUBEFREEZER_HISTORY_CAPACITY") {
            Ok(raw) => raw.parse::<usize>().map_err(|_| {
                ConfigError::ParseValue {
                    key: "KUBEFREEZER_HISTORY_CAPACITY".to_string(),
                    reason: format!("expected a positive integer, got {raw:?}"),
                }
            })?,
            Err(_) => DEFAULT_HISTORY_CAPACITY,
        };

        let log_verbosity =
            std::env::var("KUBEFREEZER_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            state_dir,
            bind_addr,
            config_path,
            schedules_path,
            history_capacity,
            log_verbosity,
        })
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("kubefreezer.pid")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("kubefreezer.sock")
    }
}
