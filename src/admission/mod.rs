//! Admission adapter (C9).
//!
//! Stateless translation between the platform's admission JSON envelope
//! and the evaluator's abstract `AdmissionRequest`/`Decision` types, in
//! the same spirit as the teacher's `messaging::webhook::WebhookAdapter`
//! (`src/messaging/webhook.rs`) — a thin, dependency-free shim with no
//! state of its own.

use crate::policy::{AdmissionRequest, Decision, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct AdmissionReview {
    pub request: AdmissionReviewRequest,
}

#[derive(Debug, Deserialize)]
pub struct AdmissionReviewRequest {
    pub uid: String,
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub operation: String,
    #[serde(rename = "userInfo")]
    pub user_info: UserInfo,
    pub object: Option<ObjectMeta>,
}

#[derive(Debug, Deserialize)]
pub struct Kind {
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectMeta {
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct AdmissionReviewResponse {
    pub uid: String,
    pub allowed: bool,
    pub status: Status,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    #[error("unrecognized admission operation: {0}")]
    UnknownOperation(String),
}

/// Stateless JSON <-> abstract-request/decision translation.
pub struct AdmissionAdapter;

impl AdmissionAdapter {
    pub fn to_request(review: &AdmissionReview) -> Result<AdmissionRequest, AdaptError> {
        let operation = match review.request.operation.as_str() {
            "CREATE" => Operation::Create,
            "UPDATE" => Operation::Update,
            "DELETE" => Operation::Delete,
            "CONNECT" => Operation::Connect,
            other => return Err(AdaptError::UnknownOperation(other.to_string())),
        };

        let annotations = review
            .request
            .object
            .as_ref()
            .map(|object| object.metadata.annotations.clone())
            .unwrap_or_default();

        Ok(AdmissionRequest {
            kind: review.request.kind.kind.clone(),
            namespace: review.request.namespace.clone(),
            resource_name: review.request.name.clone(),
            user: review.request.user_info.username.clone(),
            groups: review.request.user_info.groups.clone(),
            annotations,
            operation,
        })
    }

    pub fn to_response(uid: &str, decision: &Decision) -> AdmissionReviewResponse {
        AdmissionReviewResponse {
            uid: uid.to_string(),
            allowed: decision.allow,
            status: Status {
                message: decision.reason.clone(),
            },
        }
    }
}
