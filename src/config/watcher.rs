//! Config watcher (C6).
//!
//! Shaped after the teacher's `daemon::start_ipc_server` task-spawn loop
//! (`src/daemon.rs`) — a background tokio task that owns a receive loop,
//! retries with backoff on disconnection, and never lets a transient
//! upstream failure bring the process down. Parsing conventions (typed
//! fields pulled out of loosely-shaped input, one `ConfigError` per bad
//! field) follow `src/api/config.rs`'s section parsing.

use crate::config::source::{ChangeEvent, ConfigSource};
use crate::config::{self, ConfigCache, Configuration};
use crate::cron::{self, CronExpr};
use crate::error::ConfigError;
use crate::history::{EventType, HistoryRecorder, NewEvent};
use crate::schedule::{Schedule, ScheduleEngine};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Ties a `ConfigSource` to the live `ConfigCache` and `ScheduleEngine`,
/// keeping both atomically in sync with the upstream config object and
/// schedule list (`spec.md` §4.6).
pub struct ConfigWatcher {
    source: Arc<dyn ConfigSource>,
    config_cache: Arc<ConfigCache>,
    schedule_engine: Arc<ScheduleEngine>,
    history: Arc<HistoryRecorder>,
    last_raw_config: parking_lot::Mutex<Option<HashMap<String, String>>>,
    last_raw_schedules: parking_lot::Mutex<Option<serde_json::Value>>,
}

impl ConfigWatcher {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        config_cache: Arc<ConfigCache>,
        schedule_engine: Arc<ScheduleEngine>,
        history: Arc<HistoryRecorder>,
    ) -> Self {
        Self {
            source,
            config_cache,
            schedule_engine,
            history,
            last_raw_config: parking_lot::Mutex::new(None),
            last_raw_schedules: parking_lot::Mutex::new(None),
        }
    }

    /// Load both objects once, installing whatever parses. Intended for
    /// process startup, before the watch loop takes over.
    pub async fn initial_load(&self) {
        self.reload_config().await;
        self.reload_schedules().await;
    }

    /// Run the subscribe-and-reload loop until the process shuts down.
    /// Reconnects with exponential backoff (capped) on stream loss, per
    /// `spec.md` §5's "the watcher never blocks admission handling and
    /// degrades gracefully (stale-but-valid cache) on watch failures."
    pub async fn run(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.source.subscribe().await {
                Ok(mut rx) => {
                    backoff = INITIAL_BACKOFF;
                    while let Some(event) = rx.recv().await {
                        match event {
                            ChangeEvent::Config => self.reload_config().await,
                            ChangeEvent::Schedules => self.reload_schedules().await,
                        }
                    }
                    tracing::warn!("config source stream closed, reconnecting");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "config source unavailable, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn reload_config(&self) {
        let raw = match self.source.read_config().await {
            Ok(raw) => raw,
            Err(err) => {
                self.record_invalid(format!("config object unreadable: {err}"));
                return;
            }
        };

        // Dedup against the last-seen raw payload regardless of whether it
        // parsed — an unchanged *invalid* payload must stay silent too
        // (`spec.md` §4.6), and `notify` commonly fires several Modify
        // events per logical edit.
        if self.last_raw_config.lock().as_ref() == Some(&raw) {
            return;
        }
        *self.last_raw_config.lock() = Some(raw.clone());

        match parse_configuration(&raw) {
            Ok(parsed) => {
                let was_enabled = self.config_cache.load().freeze_enabled;
                self.config_cache.store(parsed.clone());
                if parsed.freeze_enabled && !was_enabled {
                    self.record(EventType::FreezeEnabled, "config reload", &parsed.freeze_message);
                } else if !parsed.freeze_enabled && was_enabled {
                    self.record(EventType::FreezeDisabled, "config reload", "");
                }
            }
            Err(err) => self.record_invalid(format!("config object invalid: {err}")),
        }
    }

    async fn reload_schedules(&self) {
        let raw = match self.source.read_schedules().await {
            Ok(raw) => raw,
            Err(err) => {
                self.record_invalid(format!("schedule list unreadable: {err}"));
                return;
            }
        };

        if self.last_raw_schedules.lock().as_ref() == Some(&raw) {
            return;
        }
        *self.last_raw_schedules.lock() = Some(raw.clone());

        match parse_schedules(&raw) {
            Ok(schedules) => {
                let names: Vec<_> = schedules.iter().map(|s| s.name.clone()).collect();
                self.schedule_engine.replace_all(schedules);
                for name in names {
                    self.record(EventType::ScheduleCreated, "config reload", &name);
                }
            }
            Err(err) => self.record_invalid(format!("schedule list invalid: {err}")),
        }
    }

    fn record(&self, event_type: EventType, triggered_by: &str, reason: &str) {
        self.history.append(
            NewEvent {
                event_type,
                reason: reason.to_string(),
                triggered_by: triggered_by.to_string(),
                namespace: None,
                resource_name: None,
            },
            Utc::now(),
        );
    }

    fn record_invalid(&self, reason: String) {
        tracing::error!(reason = %reason, "config reload failed, retaining previous snapshot");
        self.record(EventType::ConfigInvalid, "config watcher", &reason);
    }
}

/// Recognized config object keys (`spec.md` §6).
mod keys {
    pub const FREEZE_ENABLED: &str = "freeze_enabled";
    pub const FREEZE_UNTIL: &str = "freeze_until";
    pub const FREEZE_MESSAGE: &str = "freeze_message";
    pub const BYPASS_ANNOTATION_KEY: &str = "bypass_annotation_key";
    pub const BYPASS_ALLOWED_USERS: &str = "bypass_allowed_users";
    pub const BYPASS_EXEMPT_NAMESPACES: &str = "bypass_exempt_namespaces";
    pub const MONITORED_RESOURCES: &str = "monitored_resources";
    pub const FAIL_CLOSED: &str = "fail_closed";
}

pub fn parse_configuration(raw: &HashMap<String, String>) -> Result<Configuration, ConfigError> {
    let mut parsed = Configuration::default();

    if let Some(value) = raw.get(keys::FREEZE_ENABLED) {
        parsed.freeze_enabled = config::parse_bool(value, keys::FREEZE_ENABLED)?;
    }
    if let Some(value) = raw.get(keys::FREEZE_UNTIL) {
        parsed.freeze_until = Some(config::parse_instant(value, keys::FREEZE_UNTIL)?);
    }
    if let Some(value) = raw.get(keys::FREEZE_MESSAGE) {
        parsed.freeze_message = value.clone();
    }
    if let Some(value) = raw.get(keys::BYPASS_ANNOTATION_KEY) {
        if value.trim().is_empty() {
            return Err(ConfigError::ParseValue {
                key: keys::BYPASS_ANNOTATION_KEY.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        parsed.bypass_annotation_key = value.clone();
    }
    if let Some(value) = raw.get(keys::BYPASS_ALLOWED_USERS) {
        parsed.bypass_allowed_users = config::parse_set(value);
    }
    if let Some(value) = raw.get(keys::BYPASS_EXEMPT_NAMESPACES) {
        parsed.bypass_exempt_namespaces = config::parse_set(value);
    }
    if let Some(value) = raw.get(keys::MONITORED_RESOURCES) {
        parsed.monitored_kinds = config::parse_set(value);
    }
    if let Some(value) = raw.get(keys::FAIL_CLOSED) {
        parsed.fail_closed = config::parse_bool(value, keys::FAIL_CLOSED)?;
    }

    Ok(parsed)
}

#[derive(serde::Deserialize)]
struct RawSchedule {
    name: String,
    message: Option<String>,
    namespaces: Option<Vec<String>>,
    start: Option<String>,
    end: Option<String>,
    cron: Option<String>,
    timezone: Option<String>,
}

pub fn parse_schedules(raw: &serde_json::Value) -> Result<Vec<Schedule>, ConfigError> {
    let entries: Vec<RawSchedule> = serde_json::from_value(raw.clone())
        .map_err(|err| ConfigError::Invalid(format!("schedule list: {err}")))?;

    entries
        .into_iter()
        .map(|entry| {
            let start = entry
                .start
                .as_deref()
                .map(|s| config::parse_instant(s, "start"))
                .transpose()?;
            let end = entry
                .end
                .as_deref()
                .map(|s| config::parse_instant(s, "end"))
                .transpose()?;
            let cron = entry
                .cron
                .as_deref()
                .map(CronExpr::parse)
                .transpose()
                .map_err(|err| ConfigError::Invalid(format!("schedule {}: {err}", entry.name)))?;
            let timezone = cron::parse_timezone(entry.timezone.as_deref())
                .map_err(|err| ConfigError::Invalid(format!("schedule {}: {err}", entry.name)))?;
            let namespaces = entry.namespaces.map(|ns| ns.into_iter().collect());

            Schedule::new(entry.name.clone(), entry.message, namespaces, start, end, cron, timezone)
                .map_err(|err| ConfigError::Invalid(format!("schedule {}: {err}", entry.name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always returns the same raw config object, valid or not, and never
    /// yields a change event — enough to drive `reload_config` directly
    /// without a real filesystem or `notify` watch.
    struct FixedConfigSource {
        raw: HashMap<String, String>,
    }

    #[async_trait::async_trait]
    impl ConfigSource for FixedConfigSource {
        async fn read_config(&self) -> Result<HashMap<String, String>, ConfigError> {
            Ok(self.raw.clone())
        }

        async fn read_schedules(&self) -> Result<serde_json::Value, ConfigError> {
            Ok(serde_json::json!([]))
        }

        async fn subscribe(&self) -> Result<tokio::sync::mpsc::Receiver<ChangeEvent>, ConfigError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn repeated_invalid_config_payload_emits_config_invalid_once() {
        let mut raw = HashMap::new();
        raw.insert("fail_closed".to_string(), "not-a-bool".to_string());
        let source = Arc::new(FixedConfigSource { raw });
        let history = Arc::new(HistoryRecorder::new(100));
        let watcher = ConfigWatcher::new(
            source,
            Arc::new(ConfigCache::default()),
            Arc::new(ScheduleEngine::new()),
            history.clone(),
        );

        // Simulate a burst of duplicate `notify` Modify events for the same
        // unchanged, still-invalid edit.
        watcher.reload_config().await;
        watcher.reload_config().await;
        watcher.reload_config().await;

        let invalid_events = history.list(None, Some(EventType::ConfigInvalid));
        assert_eq!(invalid_events.len(), 1);
    }

    #[test]
    fn parses_known_keys() {
        let mut raw = HashMap::new();
        raw.insert("freeze_enabled".to_string(), "true".to_string());
        raw.insert("fail_closed".to_string(), "false".to_string());
        raw.insert(
            "bypass_allowed_users".to_string(),
            "alice\nbob".to_string(),
        );

        let parsed = parse_configuration(&raw).unwrap();
        assert!(parsed.freeze_enabled);
        assert!(!parsed.fail_closed);
        assert_eq!(parsed.bypass_allowed_users.len(), 2);
    }

    #[test]
    fn rejects_empty_bypass_annotation_key() {
        let mut raw = HashMap::new();
        raw.insert("bypass_annotation_key".to_string(), "  ".to_string());
        let err = parse_configuration(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::ParseValue { .. }));
    }

    #[test]
    fn unset_keys_keep_defaults() {
        let raw = HashMap::new();
        let parsed = parse_configuration(&raw).unwrap();
        assert_eq!(parsed, Configuration::default());
    }

    #[test]
    fn parses_schedule_list_json() {
        let raw = serde_json::json!([
            {
                "name": "nightly",
                "cron": "0 2 * * *",
                "timezone": "Europe/Berlin"
            },
            {
                "name": "release-freeze",
                "start": "2025-12-01T00:00:00Z",
                "end": "2025-12-26T00:00:00Z"
            }
        ]);
        let schedules = parse_schedules(&raw).unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].name, "nightly");
        assert_eq!(schedules[1].name, "release-freeze");
    }

    #[test]
    fn invalid_cron_in_schedule_list_is_rejected() {
        let raw = serde_json::json!([
            { "name": "broken", "cron": "not a cron" }
        ]);
        assert!(parse_schedules(&raw).is_err());
    }
}
