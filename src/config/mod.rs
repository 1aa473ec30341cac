//! Process-wide policy configuration cache (C5) and its watcher (C6).
//!
//! `Configuration` is the immutable, atomically-swapped snapshot described
//! by `spec.md` §3/§4.5. As with the schedule engine, the swap mechanism
//! is `ArcSwap`, following the teacher's own `Arc<ArcSwap<T>>` fields.

pub mod source;
pub mod watcher;

use crate::error::ConfigError;
use crate::schedule::ManualOverride;
use arc_swap::ArcSwap;
use arc_swap::Guard;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_BYPASS_ANNOTATION_KEY: &str = "admission-controller.io/emergency-bypass";
/// Fixed companion annotation (`spec.md` §6) — recorded, never interpreted,
/// so unlike `bypass_annotation_key` it is not part of `Configuration`.
pub const BYPASS_REASON_ANNOTATION_KEY: &str = "admission-controller.io/emergency-reason";

/// Process-wide policy configuration (`spec.md` §3), replaced atomically
/// on every successful config reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub freeze_enabled: bool,
    pub freeze_until: Option<DateTime<Utc>>,
    pub freeze_message: String,
    pub bypass_annotation_key: String,
    pub bypass_allowed_users: HashSet<String>,
    pub bypass_exempt_namespaces: HashSet<String>,
    pub monitored_kinds: HashSet<String>,
    pub fail_closed: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            freeze_enabled: false,
            freeze_until: None,
            freeze_message: "workload mutations are currently frozen".to_string(),
            bypass_annotation_key: DEFAULT_BYPASS_ANNOTATION_KEY.to_string(),
            bypass_allowed_users: HashSet::new(),
            bypass_exempt_namespaces: HashSet::new(),
            monitored_kinds: HashSet::new(),
            fail_closed: true,
        }
    }
}

impl Configuration {
    /// Derive the schedule engine's manual-override input (`spec.md`
    /// §4.3) from this snapshot.
    pub fn manual_override(&self) -> Option<ManualOverride> {
        if !self.freeze_enabled {
            return None;
        }
        Some(ManualOverride {
            message: self.freeze_message.clone(),
            until: self.freeze_until,
        })
    }

    pub fn is_user_allowed(&self, user: &str, groups: &[String]) -> bool {
        self.bypass_allowed_users.contains(user)
            || groups.iter().any(|g| self.bypass_allowed_users.contains(g))
    }

    pub fn is_namespace_exempt(&self, namespace: &str) -> bool {
        self.bypass_exempt_namespaces.contains(namespace)
    }

    pub fn is_kind_monitored(&self, kind: &str) -> bool {
        self.monitored_kinds.contains(kind)
    }
}

/// Single-writer (watcher) / many-reader config snapshot cache.
pub struct ConfigCache {
    current: ArcSwap<Configuration>,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl ConfigCache {
    pub fn new(initial: Configuration) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Borrow the current snapshot. The guard is valid for as long as
    /// held, even if a writer installs a new snapshot concurrently —
    /// readers never observe a partially-applied update.
    pub fn load(&self) -> Guard<Arc<Configuration>> {
        self.current.load()
    }

    pub fn store(&self, config: Configuration) {
        self.current.store(Arc::new(config));
    }
}

/// Parse a boolean config value: `"true"`/`"false"`, case-insensitive
/// (`spec.md` §4.6).
pub fn parse_bool(raw: &str, key: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::ParseValue {
            key: key.to_string(),
            reason: format!("expected \"true\" or \"false\", got {raw:?}"),
        }),
    }
}

/// Parse a newline-separated list into a set, skipping blank lines
/// (`spec.md` §4.6).
pub fn parse_set(raw: &str) -> HashSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an RFC 3339 timestamp, assuming UTC when the string carries no
/// offset (`spec.md` §4.6/§6).
pub fn parse_instant(raw: &str, key: &str) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(ConfigError::ParseValue {
        key: key.to_string(),
        reason: format!("expected an RFC 3339 timestamp, got {raw:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_is_case_insensitive() {
        assert!(parse_bool("TRUE", "k").unwrap());
        assert!(parse_bool("False", "k").unwrap());
        assert!(parse_bool("true", "k").unwrap());
        assert!(parse_bool("nah", "k").is_err());
    }

    #[test]
    fn parse_set_skips_blank_lines() {
        let set = parse_set("alice\n\nbob\n  \ncarol");
        assert_eq!(set.len(), 3);
        assert!(set.contains("alice"));
        assert!(set.contains("carol"));
    }

    #[test]
    fn parse_instant_defaults_to_utc_when_offset_missing() {
        let with_offset = parse_instant("2025-12-25T10:00:00Z", "k").unwrap();
        let without_offset = parse_instant("2025-12-25T10:00:00", "k").unwrap();
        assert_eq!(with_offset, without_offset);
    }

    #[test]
    fn manual_override_absent_when_freeze_disabled() {
        let config = Configuration::default();
        assert!(config.manual_override().is_none());
    }

    #[test]
    fn manual_override_present_when_freeze_enabled() {
        let mut config = Configuration::default();
        config.freeze_enabled = true;
        config.freeze_message = "frozen for release".to_string();
        let manual = config.manual_override().unwrap();
        assert_eq!(manual.message, "frozen for release");
        assert!(manual.until.is_none());
    }

    #[test]
    fn cache_readers_see_coherent_snapshot_across_store() {
        let cache = ConfigCache::default();
        let before = cache.load();
        assert!(!before.freeze_enabled);

        let mut updated = Configuration::default();
        updated.freeze_enabled = true;
        cache.store(updated);

        // The guard taken before the store still reads the old snapshot.
        assert!(!before.freeze_enabled);
        assert!(cache.load().freeze_enabled);
    }
}
