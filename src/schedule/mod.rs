//! Freeze schedule engine (C3).
//!
//! Owns the set of named freeze schedules and answers "is a freeze active
//! at instant T (for this namespace)?". Readers (the policy evaluator, one
//! call per admission request) see a coherent snapshot of the schedule set
//! at all times via `ArcSwap`, a read-copy-update discipline matching the
//! `Arc<ArcSwap<Vec<AgentLink>>>` field on `AgentDeps::links`
//! (`src/lib.rs`) — generalized here from a `Vec` swap to a name-keyed
//! map swap.

use crate::cron::CronExpr;
use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// How a schedule determines its active windows (`spec.md` §9 Design
/// Notes: `Schedule = Absolute | Recurring | Windowed`).
#[derive(Debug, Clone)]
pub enum Activation {
    /// Active iff `start <= instant < end`.
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Active iff the cron expression matches, interpreted in `timezone`.
    Recurring { cron: CronExpr, timezone: Tz },
    /// Active iff both the window and the cron expression match.
    Windowed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cron: CronExpr,
        timezone: Tz,
    },
    /// Neither a window nor a cron was supplied, or only one side of a
    /// window was given without the other — misconfigured. Never active.
    Never,
}

/// A named freeze schedule (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Schedule {
    pub name: String,
    pub message: Option<String>,
    /// `None` or empty means "applies to all namespaces".
    pub namespaces: Option<HashSet<String>>,
    pub activation: Activation,
}

impl Schedule {
    /// Construct and validate a schedule per the four activation-rule
    /// cases of `spec.md` §4.3. Case 4 ("otherwise") is accepted rather
    /// than rejected — it yields `Activation::Never`, and the caller is
    /// expected to surface that as a warning (it is never silently
    /// treated as "always active" or dropped).
    pub fn new(
        name: impl Into<String>,
        message: Option<String>,
        namespaces: Option<HashSet<String>>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        cron: Option<CronExpr>,
        timezone: Tz,
    ) -> Result<Self, ScheduleError> {
        let name = name.into();
        let activation = match (start, end, cron) {
            (Some(start), Some(end), None) => {
                if end <= start {
                    return Err(ScheduleError::NonPositiveWindow { name });
                }
                Activation::Absolute { start, end }
            }
            (None, None, Some(cron)) => Activation::Recurring {
                cron,
                timezone,
            },
            (Some(start), Some(end), Some(cron)) => {
                if end <= start {
                    return Err(ScheduleError::NonPositiveWindow { name });
                }
                Activation::Windowed {
                    start,
                    end,
                    cron,
                    timezone,
                }
            }
            _ => Activation::Never,
        };

        Ok(Self {
            name,
            message,
            namespaces,
            activation,
        })
    }

    pub fn is_misconfigured(&self) -> bool {
        matches!(self.activation, Activation::Never)
    }

    fn active_at(&self, instant: DateTime<Utc>) -> bool {
        match &self.activation {
            Activation::Absolute { start, end } => *start <= instant && instant < *end,
            Activation::Recurring { cron, timezone } => cron.matches(instant, *timezone),
            Activation::Windowed {
                start,
                end,
                cron,
                timezone,
            } => *start <= instant && instant < *end && cron.matches(instant, *timezone),
            Activation::Never => false,
        }
    }

    fn applies_to_namespace(&self, namespace: Option<&str>) -> bool {
        match (&self.namespaces, namespace) {
            (None, _) => true,
            (Some(set), _) if set.is_empty() => true,
            (Some(_), None) => true,
            (Some(set), Some(ns)) => set.contains(ns),
        }
    }
}

/// A schedule (or the synthetic manual override) that is active at the
/// instant queried, carried back to the evaluator for message composition.
#[derive(Debug, Clone)]
pub struct ActiveMatch {
    pub name: String,
    pub message: Option<String>,
}

/// The manual, config-driven override described in `spec.md` §4.3. Derived
/// by the caller from the current `Configuration` snapshot (C5) — the
/// schedule engine itself holds no reference to the config cache, keeping
/// C3 and C5 independently testable.
#[derive(Debug, Clone)]
pub struct ManualOverride {
    pub message: String,
    /// `freeze_until`. `None` means the override never self-clears.
    pub until: Option<DateTime<Utc>>,
}

const MANUAL_SCHEDULE_NAME: &str = "manual";

/// Owns the current schedule set and answers freeze-activity queries.
pub struct ScheduleEngine {
    schedules: ArcSwap<HashMap<String, Arc<Schedule>>>,
}

impl Default for ScheduleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self {
            schedules: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Replace the schedule identified by `schedule.name`, or insert it if
    /// new. Copy-on-write with respect to concurrent readers: readers that
    /// loaded a snapshot before this call keep seeing it in full.
    pub fn upsert(&self, schedule: Schedule) {
        if schedule.is_misconfigured() {
            tracing::warn!(
                schedule = %schedule.name,
                "schedule has neither a valid window nor a cron expression; it will never be active"
            );
        }
        let mut next = (**self.schedules.load()).clone();
        next.insert(schedule.name.clone(), Arc::new(schedule));
        self.schedules.store(Arc::new(next));
    }

    /// Remove a schedule by name. Returns true if it existed.
    pub fn remove(&self, name: &str) -> bool {
        let current = self.schedules.load();
        if !current.contains_key(name) {
            return false;
        }
        let mut next = (**current).clone();
        next.remove(name);
        self.schedules.store(Arc::new(next));
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schedule>> {
        self.schedules.load().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Schedule>> {
        self.schedules.load().values().cloned().collect()
    }

    /// Replace the entire schedule set atomically (used by the config
    /// watcher on a successful reload of the schedule list, `spec.md`
    /// §4.6/§6).
    pub fn replace_all(&self, schedules: Vec<Schedule>) {
        for schedule in &schedules {
            if schedule.is_misconfigured() {
                tracing::warn!(
                    schedule = %schedule.name,
                    "schedule has neither a valid window nor a cron expression; it will never be active"
                );
            }
        }
        let map = schedules
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        self.schedules.store(Arc::new(map));
    }

    /// Is any freeze active at `instant` for `namespace`? Returns the
    /// active matches (manual override first if present, then schedules)
    /// for message composition by the caller.
    pub fn is_active(
        &self,
        instant: DateTime<Utc>,
        namespace: Option<&str>,
        manual_override: Option<&ManualOverride>,
    ) -> (bool, Vec<ActiveMatch>) {
        let mut matches = Vec::new();

        if let Some(manual) = manual_override {
            let still_active = manual.until.is_none_or(|until| instant < until);
            if still_active {
                matches.push(ActiveMatch {
                    name: MANUAL_SCHEDULE_NAME.to_string(),
                    message: Some(manual.message.clone()),
                });
            }
        }

        let current = self.schedules.load();
        for schedule in current.values() {
            if schedule.active_at(instant) && schedule.applies_to_namespace(namespace) {
                matches.push(ActiveMatch {
                    name: schedule.name.clone(),
                    message: schedule.message.clone(),
                });
            }
        }

        matches.sort_by(|a, b| a.name.cmp(&b.name));
        (!matches.is_empty(), matches)
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
    fn absolute_window_requires_end_after_start() {
        let start = utc(2025, 12, 26, 0, 0, 0);
        let end = utc(2025, 12, 24, 0, 0, 0);
        let err = Schedule::new("x", None, None, Some(start), Some(end), None, Tz::UTC)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::NonPositiveWindow { .. }));
    }

    #[test]
    fn scenario_1_deny_by_absolute_window() {
        let engine = ScheduleEngine::new();
        let schedule = Schedule::new(
            "holiday",
            None,
            None,
            Some(utc(2025, 12, 24, 0, 0, 0)),
            Some(utc(2025, 12, 26, 0, 0, 0)),
            None,
            Tz::UTC,
        )
        .unwrap();
        engine.upsert(schedule);

        let (active, matches) =
            engine.is_active(utc(2025, 12, 25, 10, 0, 0), Some("prod"), None);
        assert!(active);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "holiday");
    }

    #[test]
    fn scenario_3_cron_match() {
        let engine = ScheduleEngine::new();
        let cron = CronExpr::parse("0 22 * * *").unwrap();
        let schedule = Schedule::new(
            "nightly",
            None,
            None,
            None,
            None,
            Some(cron),
            "Europe/Berlin".parse().unwrap(),
        )
        .unwrap();
        engine.upsert(schedule);

        let (active, _) = engine.is_active(utc(2025, 6, 1, 20, 0, 30), None, None);
        assert!(active);
    }

    #[test]
    fn namespace_filter_excludes_non_matching_namespace() {
        let engine = ScheduleEngine::new();
        let mut namespaces = HashSet::new();
        namespaces.insert("prod".to_string());
        let schedule = Schedule::new(
            "prod-only",
            None,
            Some(namespaces),
            Some(utc(2025, 1, 1, 0, 0, 0)),
            Some(utc(2025, 1, 2, 0, 0, 0)),
            None,
            Tz::UTC,
        )
        .unwrap();
        engine.upsert(schedule);

        let (active_prod, _) = engine.is_active(utc(2025, 1, 1, 12, 0, 0), Some("prod"), None);
        let (active_staging, _) =
            engine.is_active(utc(2025, 1, 1, 12, 0, 0), Some("staging"), None);
        assert!(active_prod);
        assert!(!active_staging);
    }

    #[test]
    fn manual_override_active_without_end() {
        let engine = ScheduleEngine::new();
        let manual = ManualOverride {
            message: "manual freeze".to_string(),
            until: None,
        };
        let (active, matches) = engine.is_active(utc(2025, 1, 1, 0, 0, 0), None, Some(&manual));
        assert!(active);
        assert_eq!(matches[0].name, "manual");
    }

    #[test]
    fn manual_override_self_clears_after_until() {
        let engine = ScheduleEngine::new();
        let manual = ManualOverride {
            message: "manual freeze".to_string(),
            until: Some(utc(2025, 1, 1, 0, 0, 0)),
        };
        let (active, _) = engine.is_active(utc(2025, 1, 2, 0, 0, 0), None, Some(&manual));
        assert!(!active);
    }

    #[test]
    fn misconfigured_schedule_is_never_active() {
        let schedule = Schedule::new("broken", None, None, None, None, None, Tz::UTC).unwrap();
        assert!(schedule.is_misconfigured());
        let engine = ScheduleEngine::new();
        engine.upsert(schedule);
        let (active, _) = engine.is_active(utc(2025, 1, 1, 0, 0, 0), None, None);
        assert!(!active);
    }

    #[test]
    fn multiple_matches_sorted_lexicographically_by_name() {
        let engine = ScheduleEngine::new();
        for name in ["zeta", "alpha", "mu"] {
            engine
                .upsert(
                    Schedule::new(
                        name,
                        Some(format!("{name}-msg")),
                        None,
                        Some(utc(2025, 1, 1, 0, 0, 0)),
                        Some(utc(2025, 1, 2, 0, 0, 0)),
                        None,
                        Tz::UTC,
                    )
                    .unwrap(),
                );
        }
        let (active, matches) = engine.is_active(utc(2025, 1, 1, 12, 0, 0), None, None);
        assert!(active);
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mu", "zeta"]);
    }

    #[test]
    fn remove_drops_schedule() {
        let engine = ScheduleEngine::new();
        engine.upsert(
            Schedule::new(
                "temp",
                None,
                None,
                Some(utc(2025, 1, 1, 0, 0, 0)),
                Some(utc(2025, 1, 2, 0, 0, 0)),
                None,
                Tz::UTC,
            )
            .unwrap(),
        );
        assert!(engine.remove("temp"));
        assert!(!engine.remove("temp"));
        assert!(engine.get("temp").is_none());
    }
}
