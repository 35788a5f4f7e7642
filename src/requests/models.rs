//! Deletion request wire types.

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Project,
    Stage,
    Task,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityType::Project => "project",
            EntityType::Stage => "stage",
            EntityType::Task => "task",
        })
    }
}

impl FromStr for EntityType {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(EntityType::Project),
            "stage" => Ok(EntityType::Stage),
            "task" => Ok(EntityType::Task),
            other => Err(CoordinatorError::Validation(format!(
                "unknown entity type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    #[serde(alias = "PENDING", alias = "Pending")]
    Pending,
    #[serde(alias = "APPROVED", alias = "Approved")]
    Approved,
    #[serde(alias = "REJECTED", alias = "Rejected")]
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        })
    }
}

/// A request to delete a project, stage or task, as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub request_id: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl DeletionRequest {
    pub fn pending(
        request_id: impl Into<String>,
        entity_type: EntityType,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            entity_type,
            project_id: Some(project_id.into()),
            stage_id: None,
            task_id: None,
            status: RequestStatus::Pending,
            reason: None,
            requested_by: None,
            created_at: None,
        }
    }

    pub fn with_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.stage_id = Some(stage_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = status;
        self
    }

    /// The id of the targeted entity, chosen by `entity_type`.
    pub fn entity_id(&self) -> Option<&str> {
        match self.entity_type {
            EntityType::Project => self.project_id.as_deref(),
            EntityType::Stage => self.stage_id.as_deref(),
            EntityType::Task => self.task_id.as_deref(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// A task request must name its task, a stage request its stage.
    pub fn validate(&self) -> Result<()> {
        validate_ids(
            self.entity_type,
            self.project_id.as_deref(),
            self.stage_id.as_deref(),
            self.task_id.as_deref(),
        )
    }
}

/// A deletion request submitted from the requester side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeletionRequest {
    pub entity_type: EntityType,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NewDeletionRequest {
    pub fn validate(&self) -> Result<()> {
        validate_ids(
            self.entity_type,
            Some(self.project_id.as_str()),
            self.stage_id.as_deref(),
            self.task_id.as_deref(),
        )
    }
}

fn validate_ids(
    entity_type: EntityType,
    project_id: Option<&str>,
    stage_id: Option<&str>,
    task_id: Option<&str>,
) -> Result<()> {
    let present = |v: Option<&str>| v.is_some_and(|s| !s.trim().is_empty());
    if !present(project_id) {
        return Err(CoordinatorError::Validation(format!(
            "{} deletion request is missing project_id",
            entity_type
        )));
    }
    match entity_type {
        EntityType::Stage if !present(stage_id) => Err(CoordinatorError::Validation(
            "stage deletion request is missing stage_id".into(),
        )),
        EntityType::Task if !present(task_id) => Err(CoordinatorError::Validation(
            "task deletion request is missing task_id".into(),
        )),
        _ => Ok(()),
    }
}

/// Answer to an approve/reject/submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResolutionAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// `success: false` becomes `ConfirmRejected`.
    pub fn into_result(self) -> Result<Option<String>> {
        if self.success {
            Ok(self.message)
        } else {
            Err(CoordinatorError::ConfirmRejected {
                message: self
                    .message
                    .unwrap_or_else(|| "request was not accepted".into()),
            })
        }
    }
}

/// Decode a `body` that may be a JSON-encoded string.
pub(crate) fn unwrap_body(value: &Value) -> Result<Value> {
    match value.get("body") {
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|e| CoordinatorError::Protocol(format!("body string is not JSON: {}", e))),
        Some(body) => Ok(body.clone()),
        None => Ok(value.clone()),
    }
}

/// Pull the request array out of a listing response.
///
/// Accepted locations: top-level array, `body`, `body.requests`,
/// `body.deletion_requests`, `body.action_response.requests`,
/// `body.action_response.json.requests`.
pub fn extract_requests(response: &Value) -> Result<Vec<DeletionRequest>> {
    let body = unwrap_body(response)?;
    let array = [
        Some(&body),
        body.get("requests"),
        body.get("deletion_requests"),
        body.pointer("/action_response/requests"),
        body.pointer("/action_response/json/requests"),
    ]
    .into_iter()
    .flatten()
    .find(|v| v.is_array());

    match array {
        Some(items) => serde_json::from_value(items.clone())
            .map_err(|e| CoordinatorError::Protocol(format!("malformed deletion request: {}", e))),
        None => Err(CoordinatorError::Protocol(
            "listing response contains no request array".into(),
        )),
    }
}

/// Read an approve/reject/submit response into a [`ResolutionAck`].
pub fn extract_ack(response: &Value) -> Result<ResolutionAck> {
    let body = unwrap_body(response)?;
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let success = match body.get("success").and_then(Value::as_bool) {
        Some(flag) => flag,
        None => match body.get("status").and_then(Value::as_str) {
            Some(status) => matches!(status, "ok" | "success"),
            None => response
                .get("statusCode")
                .and_then(Value::as_u64)
                .map(|code| (200..300).contains(&code))
                .unwrap_or(false),
        },
    };
    Ok(ResolutionAck { success, message })
}
