//! Time-bounded exemption store (C4).
//!
//! Keyed by `id` with a secondary namespace index, matching the
//! lock-guarded `HashMap` + bookkeeping shape of `heartbeat::Scheduler`
//! (`src/heartbeat/scheduler.rs`), generalized to single-use,
//! lazily-evicted exemption semantics. `parking_lot::Mutex` is used
//! instead of `tokio::sync::RwLock` because every operation here is
//! short, synchronous CPU work — no `.await` point, so nothing else on
//! the evaluation hot path ever blocks behind it.

use crate::error::ExemptionError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A time-bounded exemption (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exemption {
    pub id: String,
    pub namespace: String,
    /// `None` means the exemption is namespace-wide.
    pub resource_name: Option<String>,
    pub duration_minutes: u32,
    pub reason: Option<String>,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set true the first time a *specific-resource* exemption is used to
    /// authorize admission. Namespace-wide exemptions stay reusable until
    /// they expire, so this flag only ever toggles for the former.
    pub used: bool,
}

/// Input for creating a new exemption; `id`/`created_at`/`expires_at`/
/// `used` are computed by the store.
#[derive(Debug, Clone)]
pub struct NewExemption {
    pub namespace: String,
    pub resource_name: Option<String>,
    pub duration_minutes: u32,
    pub reason: Option<String>,
    pub approved_by: Option<String>,
}

struct Inner {
    by_id: HashMap<String, Exemption>,
    /// namespace -> set of exemption ids, for O(1)-ish lookup by
    /// `matches(namespace, ...)` instead of a full table scan.
    by_namespace: HashMap<String, Vec<String>>,
}

/// Readers (policy evaluator) and writers (REST API create/delete,
/// evaluator mark-used) share a single mutex, per `spec.md` §5's resource
/// policy for C4.
pub struct ExemptionStore {
    inner: Mutex<Inner>,
}

impl Default for ExemptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExemptionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                by_namespace: HashMap::new(),
            }),
        }
    }

    /// Create and store a new exemption. Fails on non-positive duration,
    /// empty namespace, or an `expires_at` that would already be in the
    /// past relative to `now` (`spec.md` §4.4).
    pub fn create(
        &self,
        request: NewExemption,
        id: String,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Exemption, ExemptionError> {
        if request.duration_minutes == 0 {
            return Err(ExemptionError::NonPositiveDuration);
        }
        if request.namespace.trim().is_empty() {
            return Err(ExemptionError::EmptyNamespace);
        }
        let expires_at = created_at + chrono::Duration::minutes(request.duration_minutes as i64);
        if expires_at <= now {
            return Err(ExemptionError::AlreadyExpired);
        }

        let exemption = Exemption {
            id: id.clone(),
            namespace: request.namespace.clone(),
            resource_name: request.resource_name,
            duration_minutes: request.duration_minutes,
            reason: request.reason,
            approved_by: request.approved_by,
            created_at,
            expires_at,
            used: false,
        };

        let mut inner = self.inner.lock();
        inner
            .by_namespace
            .entry(request.namespace)
            .or_default()
            .push(id.clone());
        inner.by_id.insert(id, exemption.clone());

        Ok(exemption)
    }

    pub fn get(&self, id: &str) -> Option<Exemption> {
        self.inner.lock().by_id.get(id).cloned()
    }

    /// List exemptions. `active_only` restricts to those not yet expired
    /// relative to `now`.
    pub fn list(&self, active_only: bool, now: DateTime<Utc>) -> Vec<Exemption> {
        self.inner
            .lock()
            .by_id
            .values()
            .filter(|e| !active_only || e.expires_at > now)
            .cloned()
            .collect()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.remove(id) {
            Some(removed) => {
                if let Some(ids) = inner.by_namespace.get_mut(&removed.namespace) {
                    ids.retain(|existing| existing != id);
                }
                true
            }
            None => false,
        }
    }

    /// Find an exemption authorizing admission for `(namespace,
    /// resource_name)` at `now`, per `spec.md` §4.4:
    ///
    /// - the stored `resource_name` is absent (namespace-wide), or equals
    ///   the request's `resource_name`;
    /// - expired exemptions (`expires_at <= now`) never match and are
    ///   evicted lazily on this access;
    /// - a specific-resource match is marked `used` in the same critical
    ///   section as the read, and will not match again afterward
    ///   (`spec.md` §9 Design Notes: no separate read-then-write window).
    pub fn matches(
        &self,
        namespace: &str,
        resource_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Exemption> {
        let mut inner = self.inner.lock();
        let ids = inner.by_namespace.get(namespace).cloned().unwrap_or_default();

        let mut expired_ids = Vec::new();
        let mut found_id = None;

        for id in &ids {
            let Some(exemption) = inner.by_id.get(id) else {
                continue;
            };
            if exemption.expires_at <= now {
                expired_ids.push(id.clone());
                continue;
            }
            let applies = match &exemption.resource_name {
                None => true,
                Some(name) => resource_name == Some(name.as_str()),
            };
            if !applies {
                continue;
            }
            if exemption.resource_name.is_some() && exemption.used {
                // Specific-resource exemptions are single-use.
                continue;
            }
            found_id = Some(id.clone());
            break;
        }

        for id in expired_ids {
            if let Some(removed) = inner.by_id.remove(&id) {
                if let Some(ids) = inner.by_namespace.get_mut(&removed.namespace) {
                    ids.retain(|existing| existing != &id);
                }
            }
        }

        let found_id = found_id?;
        let is_specific = inner.by_id.get(&found_id)?.resource_name.is_some();
        if is_specific {
            let exemption = inner.by_id.get_mut(&found_id)?;
            exemption.used = true;
            return Some(exemption.clone());
        }
        inner.by_id.get(&found_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn rejects_non_positive_duration() {
        let store = ExemptionStore::new();
        let now = utc(2025, 1, 1, 0, 0, 0);
        let err = store
            .create(
                NewExemption {
                    namespace: "prod".into(),
                    resource_name: None,
                    duration_minutes: 0,
                    reason: None,
                    approved_by: None,
                },
                "e1".into(),
                now,
                now,
            )
            .unwrap_err();
        assert!(matches!(err, ExemptionError::NonPositiveDuration));
    }

    #[test]
    fn rejects_empty_namespace() {
        let store = ExemptionStore::new();
        let now = utc(2025, 1, 1, 0, 0, 0);
        let err = store
            .create(
                NewExemption {
                    namespace: "  ".into(),
                    resource_name: None,
                    duration_minutes: 5,
                    reason: None,
                    approved_by: None,
                },
                "e1".into(),
                now,
                now,
            )
            .unwrap_err();
        assert!(matches!(err, ExemptionError::EmptyNamespace));
    }

    #[test]
    fn scenario_5_exemption_single_use() {
        let store = ExemptionStore::new();
        let t0 = utc(2025, 1, 1, 0, 0, 0);
        store
            .create(
                NewExemption {
                    namespace: "prod".into(),
                    resource_name: Some("web".into()),
                    duration_minutes: 60,
                    reason: None,
                    approved_by: Some("alice".into()),
                },
                "e1".into(),
                t0,
                t0,
            )
            .unwrap();

        let t_plus_10 = t0 + chrono::Duration::minutes(10);
        let first = store.matches("prod", Some("web"), t_plus_10);
        assert!(first.is_some());
        assert!(first.unwrap().used);

        let t_plus_11 = t0 + chrono::Duration::minutes(11);
        let second = store.matches("prod", Some("web"), t_plus_11);
        assert!(second.is_none());
    }

    #[test]
    fn namespace_wide_exemption_is_reusable_until_expiry() {
        let store = ExemptionStore::new();
        let t0 = utc(2025, 1, 1, 0, 0, 0);
        store
            .create(
                NewExemption {
                    namespace: "prod".into(),
                    resource_name: None,
                    duration_minutes: 60,
                    reason: None,
                    approved_by: None,
                },
                "e1".into(),
                t0,
                t0,
            )
            .unwrap();

        let t1 = t0 + chrono::Duration::minutes(5);
        let t2 = t0 + chrono::Duration::minutes(10);
        assert!(store.matches("prod", Some("web"), t1).is_some());
        assert!(store.matches("prod", Some("other"), t2).is_some());
    }

    #[test]
    fn expired_exemption_never_matches() {
        let store = ExemptionStore::new();
        let t0 = utc(2025, 1, 1, 0, 0, 0);
        store
            .create(
                NewExemption {
                    namespace: "prod".into(),
                    resource_name: None,
                    duration_minutes: 10,
                    reason: None,
                    approved_by: None,
                },
                "e1".into(),
                t0,
                t0,
            )
            .unwrap();

        let after_expiry = t0 + chrono::Duration::minutes(11);
        assert!(store.matches("prod", None, after_expiry).is_none());
        // Lazily evicted on access.
        assert!(store.get("e1").is_none());
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let store = ExemptionStore::new();
        let t0 = utc(2025, 1, 1, 0, 0, 0);
        store
            .create(
                NewExemption {
                    namespace: "prod".into(),
                    resource_name: None,
                    duration_minutes: 10,
                    reason: None,
                    approved_by: None,
                },
                "e1".into(),
                t0,
                t0,
            )
            .unwrap();
        assert!(store.delete("e1"));
        assert!(!store.delete("e1"));
        assert!(store.matches("prod", None, t0 + chrono::Duration::minutes(1)).is_none());
    }
}
