//! Policy evaluator (C7) — "the heart" of the gate.
//!
//! Implements the eight-step ordered bypass algorithm as a straight-line
//! `match`/early-return chain: each step either returns a terminal
//! `Decision` or falls through to the next.

use crate::clock::Clock;
use crate::config::{self, ConfigCache};
use crate::exemption::ExemptionStore;
use crate::history::{EventType, HistoryRecorder, NewEvent};
use crate::schedule::ScheduleEngine;
use std::collections::HashMap;
use std::sync::Arc;

/// The operation an admission request represents. Only `Create` and
/// `Update` are subject to freeze inspection (`spec.md` §4.7 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// Abstract admission request (`spec.md` §4.7), produced by the admission
/// adapter (C9) from the platform-native payload.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub kind: String,
    pub namespace: String,
    pub resource_name: String,
    pub user: String,
    pub groups: Vec<String>,
    pub annotations: HashMap<String, String>,
    pub operation: Operation,
}

/// Which of the algorithm's terminal steps produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    NotMonitored,
    BypassAnnotation,
    BypassUser,
    BypassNamespace,
    BypassExemption,
    Frozen,
    NoFreeze,
    InternalError,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::NotMonitored => "NOT_MONITORED",
            Category::BypassAnnotation => "BYPASS_ANNOTATION",
            Category::BypassUser => "BYPASS_USER",
            Category::BypassNamespace => "BYPASS_NAMESPACE",
            Category::BypassExemption => "BYPASS_EXEMPTION",
            Category::Frozen => "FROZEN",
            Category::NoFreeze => "NO_FREEZE",
            Category::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// The evaluator's output (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct Decision {
    pub allow: bool,
    pub reason: String,
    pub category: Category,
}

impl Decision {
    fn allow(reason: impl Into<String>, category: Category) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
            category,
        }
    }

    fn deny(reason: impl Into<String>, category: Category) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            category,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Maps admission requests to allow/deny decisions, consulting the
/// config cache, schedule engine, and exemption store, and recording a
/// history event for every terminal decision (`spec.md` §4.7).
pub struct PolicyEvaluator {
    clock: Arc<dyn Clock>,
    config: Arc<ConfigCache>,
    schedules: Arc<ScheduleEngine>,
    exemptions: Arc<ExemptionStore>,
    history: Arc<HistoryRecorder>,
}

impl PolicyEvaluator {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: Arc<ConfigCache>,
        schedules: Arc<ScheduleEngine>,
        exemptions: Arc<ExemptionStore>,
        history: Arc<HistoryRecorder>,
    ) -> Self {
        Self {
            clock,
            config,
            schedules,
            exemptions,
            history,
        }
    }

    pub fn evaluate(&self, request: &AdmissionRequest) -> Decision {
        let config = self.config.load();
        let now = self.clock.now();

        // Step 1: kind filter.
        if !config.is_kind_monitored(&request.kind) {
            return self.finish(request, Decision::allow("kind not monitored", Category::NotMonitored), now);
        }

        // Step 2: operation filter.
        if !matches!(request.operation, Operation::Create | Operation::Update) {
            return self.finish(request, Decision::allow("operation not monitored", Category::NotMonitored), now);
        }

        // Step 3: annotation bypass.
        if let Some(value) = request.annotations.get(&config.bypass_annotation_key) {
            if is_truthy(value) {
                let reason = request
                    .annotations
                    .get(config::BYPASS_REASON_ANNOTATION_KEY)
                    .cloned()
                    .unwrap_or_else(|| "bypass annotation present".to_string());
                return self.finish(request, Decision::allow(reason, Category::BypassAnnotation), now);
            }
        }

        // Step 4: user allowlist.
        if config.is_user_allowed(&request.user, &request.groups) {
            return self.finish(
                request,
                Decision::allow("user is in the bypass allowlist", Category::BypassUser),
                now,
            );
        }

        // Step 5: namespace exemption.
        if config.is_namespace_exempt(&request.namespace) {
            return self.finish(
                request,
                Decision::allow("namespace is exempt from freezes", Category::BypassNamespace),
                now,
            );
        }

        // Step 6: temporary exemption.
        if let Some(exemption) = self
            .exemptions
            .matches(&request.namespace, Some(&request.resource_name), now)
        {
            let reason = exemption
                .reason
                .unwrap_or_else(|| format!("exemption {} authorized this request", exemption.id));
            return self.finish(request, Decision::allow(reason, Category::BypassExemption), now);
        }

        // Step 7: active freeze check. `matches` is already sorted by
        // schedule name (`ScheduleEngine::is_active`); the composed message
        // must preserve that order, not re-sort by message text (`spec.md`
        // §4.7: "concatenated in lexicographic order of schedule name").
        let (active, matches) = self
            .schedules
            .is_active(now, Some(&request.namespace), config.manual_override().as_ref());
        if active {
            let message = matches
                .into_iter()
                .map(|m| m.message.unwrap_or(m.name))
                .collect::<Vec<_>>()
                .join(" ");
            return self.finish(request, Decision::deny(message, Category::Frozen), now);
        }

        // Step 8: default allow.
        self.finish(request, Decision::allow("no freeze active", Category::NoFreeze), now)
    }

    /// Evaluate under a hard deadline (`spec.md` §5). The evaluator's
    /// work is synchronous CPU-bound logic with no `.await` points of its
    /// own, so the timeout only guards against an unexpectedly slow
    /// caller-supplied clock or lock contention.
    pub async fn evaluate_with_deadline(
        self: &Arc<Self>,
        request: AdmissionRequest,
        deadline: std::time::Duration,
    ) -> Decision {
        let evaluator = self.clone();
        let request_for_task = request.clone();
        let task = tokio::task::spawn_blocking(move || evaluator.evaluate(&request_for_task));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) | Err(_) => self.fail_closed(&request, "evaluation exceeded its deadline"),
        }
    }

    fn fail_closed(&self, request: &AdmissionRequest, reason: &str) -> Decision {
        let config = self.config.load();
        let decision = if config.fail_closed {
            Decision::deny(reason.to_string(), Category::InternalError)
        } else {
            Decision::allow(reason.to_string(), Category::InternalError)
        };
        self.history.append(
            NewEvent {
                event_type: EventType::EvaluatorError,
                reason: reason.to_string(),
                triggered_by: request.user.clone(),
                namespace: Some(request.namespace.clone()),
                resource_name: Some(request.resource_name.clone()),
            },
            self.clock.now(),
        );
        decision
    }

    fn finish(&self, request: &AdmissionRequest, decision: Decision, now: chrono::DateTime<chrono::Utc>) -> Decision {
        let event_type = match decision.category {
            Category::Frozen => Some(EventType::RequestDenied),
            Category::BypassAnnotation => Some(EventType::RequestBypassedAnnotation),
            Category::BypassUser => Some(EventType::RequestBypassedUser),
            Category::BypassNamespace => Some(EventType::RequestBypassedNamespace),
            Category::BypassExemption => Some(EventType::RequestBypassedExemption),
            Category::InternalError => Some(EventType::EvaluatorError),
            Category::NotMonitored | Category::NoFreeze => None,
        };

        if let Some(event_type) = event_type {
            self.history.append(
                NewEvent {
                    event_type,
                    reason: decision.reason.clone(),
                    triggered_by: request.user.clone(),
                    namespace: Some(request.namespace.clone()),
                    resource_name: Some(request.resource_name.clone()),
                },
                now,
            );
        }

        decision
    }
}
