//! Config source abstraction (C12).
//!
//! `spec.md` explicitly puts the cluster ConfigMap/API-server watch
//! machinery out of scope (external collaborator), but the config cache
//! and watcher still need *something* to read from and subscribe to. This
//! trait is the seam: a reference `FileConfigSource` backs it with local
//! JSON files and the teacher's filesystem-watch idiom, and a real
//! deployment swaps in a ConfigMap-backed implementation without touching
//! `ConfigWatcher`.

use crate::error::ConfigError;
use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which watched object changed. The watcher re-reads only what moved
/// instead of re-parsing everything on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Config,
    Schedules,
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Read the current config object as a flat key-value map
    /// (`spec.md` §6 — values themselves may encode booleans, lists, or
    /// timestamps, parsed by the caller).
    async fn read_config(&self) -> Result<HashMap<String, String>, ConfigError>;

    /// Read the current schedule list as raw JSON (`spec.md` §3/§6).
    async fn read_schedules(&self) -> Result<serde_json::Value, ConfigError>;

    /// Subscribe to change notifications. Each implementation decides its
    /// own notion of "changed" (mtime, watch API resourceVersion, etc.).
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, ConfigError>;
}

/// Reference `ConfigSource` backed by two local JSON files, watched with
/// `notify` the way the cluster's ConfigMap watch would be in a full
/// deployment.
pub struct FileConfigSource {
    config_path: PathBuf,
    schedules_path: PathBuf,
}

impl FileConfigSource {
    pub fn new(config_path: impl Into<PathBuf>, schedules_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            schedules_path: schedules_path.into(),
        }
    }

    async fn read_json_map(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ConfigError::SourceUnavailable(format!("reading {}: {err}", path.display()))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ConfigError::Invalid(format!("{}: {err}", path.display())))
    }

    async fn read_json_value(path: &Path) -> Result<serde_json::Value, ConfigError> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ConfigError::SourceUnavailable(format!("reading {}: {err}", path.display()))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ConfigError::Invalid(format!("{}: {err}", path.display())))
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn read_config(&self) -> Result<HashMap<String, String>, ConfigError> {
        Self::read_json_map(&self.config_path).await
    }

    async fn read_schedules(&self) -> Result<serde_json::Value, ConfigError> {
        Self::read_json_value(&self.schedules_path).await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, ConfigError> {
        let (tx, rx) = mpsc::channel(16);
        let config_path = self.config_path.clone();
        let schedules_path = self.schedules_path.clone();

        let tx = Arc::new(tx);
        let watch_tx = tx.clone();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let Ok(event) = event else { return };
            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in &event.paths {
                let changed = if path == &config_path {
                    Some(ChangeEvent::Config)
                } else if path == &schedules_path {
                    Some(ChangeEvent::Schedules)
                } else {
                    None
                };
                if let Some(changed) = changed {
                    let _ = watch_tx.try_send(changed);
                }
            }
        })
        .map_err(|err| ConfigError::SourceUnavailable(err.to_string()))?;

        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .map_err(|err| ConfigError::SourceUnavailable(err.to_string()))?;
        watcher
            .watch(&self.schedules_path, RecursiveMode::NonRecursive)
            .map_err(|err| ConfigError::SourceUnavailable(err.to_string()))?;

        // Leak the watcher onto a background task's stack so it keeps
        // living for the lifetime of the subscription; dropping it would
        // tear the OS watch down immediately.
        tokio::spawn(async move {
            let _watcher = watcher;
            std::future::pending::<()>().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_config_map_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(file, r#"{{"freeze_enabled": "true"}}"#).unwrap();

        let source = FileConfigSource::new(&config_path, dir.path().join("schedules.json"));
        let read = source.read_config().await.unwrap();
        assert_eq!(read.get("freeze_enabled").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(
            dir.path().join("missing-config.json"),
            dir.path().join("missing-schedules.json"),
        );
        let err = source.read_config().await.unwrap_err();
        assert!(matches!(err, ConfigError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "not json").unwrap();

        let source = FileConfigSource::new(&config_path, dir.path().join("schedules.json"));
        let err = source.read_config().await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
