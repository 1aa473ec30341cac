//! Bounded, append-only event history (C8).
//!
//! Bounded FIFO, most-recent-first `list()`, in the same shape as
//! `conversation::history`, re-purposed here from conversation turns to
//! admission decisions, with an event-enum style borrowed from
//! `heartbeat::scheduler::HeartbeatEvent`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// History event taxonomy (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    FreezeEnabled,
    FreezeDisabled,
    RequestDenied,
    RequestBypassedAnnotation,
    RequestBypassedUser,
    RequestBypassedNamespace,
    RequestBypassedExemption,
    ExemptionCreated,
    ExemptionDeleted,
    ScheduleCreated,
    ScheduleDeleted,
    ConfigInvalid,
    EvaluatorError,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::FreezeEnabled => "FREEZE_ENABLED",
            EventType::FreezeDisabled => "FREEZE_DISABLED",
            EventType::RequestDenied => "REQUEST_DENIED",
            EventType::RequestBypassedAnnotation => "REQUEST_BYPASSED_ANNOTATION",
            EventType::RequestBypassedUser => "REQUEST_BYPASSED_USER",
            EventType::RequestBypassedNamespace => "REQUEST_BYPASSED_NAMESPACE",
            EventType::RequestBypassedExemption => "REQUEST_BYPASSED_EXEMPTION",
            EventType::ExemptionCreated => "EXEMPTION_CREATED",
            EventType::ExemptionDeleted => "EXEMPTION_DELETED",
            EventType::ScheduleCreated => "SCHEDULE_CREATED",
            EventType::ScheduleDeleted => "SCHEDULE_DELETED",
            EventType::ConfigInvalid => "CONFIG_INVALID",
            EventType::EvaluatorError => "EVALUATOR_ERROR",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single history entry (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing regardless of wall-clock ties, used to break
    /// same-millisecond ordering deterministically (`spec.md` §4.8).
    pub sequence: u64,
    pub event_type: EventType,
    pub reason: String,
    pub triggered_by: String,
    pub namespace: Option<String>,
    pub resource_name: Option<String>,
}

/// Fields supplied by the caller when recording an event; `id`,
/// `timestamp`, and `sequence` are assigned by the recorder.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub reason: String,
    pub triggered_by: String,
    pub namespace: Option<String>,
    pub resource_name: Option<String>,
}

/// Bounded ring of history events, guarded by a single mutex — append is
/// non-blocking work, so contention is not a concern (`spec.md` §5).
pub struct HistoryRecorder {
    capacity: usize,
    events: Mutex<VecDeque<HistoryEvent>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
}

impl HistoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Append an event, evicting the oldest entry if at capacity.
    pub fn append(&self, event: NewEvent, timestamp: DateTime<Utc>) -> HistoryEvent {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let recorded = HistoryEvent {
            id,
            timestamp,
            sequence,
            event_type: event.event_type,
            reason: event.reason,
            triggered_by: event.triggered_by,
            namespace: event.namespace,
            resource_name: event.resource_name,
        };

        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(recorded.clone());
        recorded
    }

    /// Most-recent-first, optionally limited and filtered by event type.
    pub fn list(&self, limit: Option<usize>, filter: Option<EventType>) -> Vec<HistoryEvent> {
        let events = self.events.lock();
        let iter = events
            .iter()
            .rev()
            .filter(|event| filter.is_none_or(|wanted| event.event_type == wanted))
            .cloned();
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, s).unwrap()
    }

    fn event(event_type: EventType, reason: &str) -> NewEvent {
        NewEvent {
            event_type,
            reason: reason.to_string(),
            triggered_by: "tester".to_string(),
            namespace: None,
            resource_name: None,
        }
    }

    #[test]
    fn bounded_capacity_evicts_oldest() {
        let recorder = HistoryRecorder::new(2);
        recorder.append(event(EventType::RequestDenied, "one"), utc(1));
        recorder.append(event(EventType::RequestDenied, "two"), utc(2));
        recorder.append(event(EventType::RequestDenied, "three"), utc(3));

        assert_eq!(recorder.len(), 2);
        let listed = recorder.list(None, None);
        let reasons: Vec<_> = listed.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["three", "two"]);
    }

    #[test]
    fn list_is_most_recent_first() {
        let recorder = HistoryRecorder::new(10);
        recorder.append(event(EventType::FreezeEnabled, "a"), utc(1));
        recorder.append(event(EventType::FreezeDisabled, "b"), utc(2));

        let listed = recorder.list(None, None);
        assert_eq!(listed[0].reason, "b");
        assert_eq!(listed[1].reason, "a");
    }

    #[test]
    fn sequence_breaks_ties_within_same_millisecond() {
        let recorder = HistoryRecorder::new(10);
        let first = recorder.append(event(EventType::RequestDenied, "a"), utc(1));
        let second = recorder.append(event(EventType::RequestDenied, "b"), utc(1));
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn filter_by_event_type() {
        let recorder = HistoryRecorder::new(10);
        recorder.append(event(EventType::RequestDenied, "deny"), utc(1));
        recorder.append(event(EventType::FreezeEnabled, "enable"), utc(2));

        let denies = recorder.list(None, Some(EventType::RequestDenied));
        assert_eq!(denies.len(), 1);
        assert_eq!(denies[0].reason, "deny");
    }

    #[test]
    fn limit_truncates_result() {
        let recorder = HistoryRecorder::new(10);
        for i in 0..5 {
            recorder.append(event(EventType::RequestDenied, "x"), utc(i));
        }
        assert_eq!(recorder.list(Some(2), None).len(), 2);
    }
}
