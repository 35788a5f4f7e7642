//! HTTP implementation of [`ReviewBackend`].

use super::models::{
    extract_ack, extract_requests, DeletionRequest, EntityType, NewDeletionRequest, ResolutionAck,
};
use super::traits::ReviewBackend;
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Review API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub api_url: String,
    /// Identity sent as `email_id` in every call
    pub actor_email: String,
    pub request_timeout_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/invoke".into(),
            actor_email: "reviewer@localhost".into(),
            request_timeout_secs: 30,
        }
    }
}

/// Posts JSON envelopes `{action, payload}` to a single invoke endpoint.
pub struct HttpReviewBackend {
    http_client: reqwest::Client,
    api_url: String,
    actor_email: String,
}

impl HttpReviewBackend {
    pub fn new(config: &ReviewConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            actor_email: config.actor_email.clone(),
        })
    }

    async fn invoke(&self, body: &Value) -> Result<Value> {
        let response = self.http_client.post(&self.api_url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(%status, bytes = text.len(), "Review API responded");

        if !status.is_success() {
            return Err(CoordinatorError::Transport(format!(
                "API {}: {}",
                status.as_u16(),
                text
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| CoordinatorError::Protocol(format!("bad JSON from review API: {}", e)))
    }

    fn actor(&self, role: &str) -> Value {
        json!({ "role": role, "email_id": self.actor_email })
    }
}

#[async_trait]
impl ReviewBackend for HttpReviewBackend {
    async fn list_deletion_requests(&self, subject_domain: &str) -> Result<Vec<DeletionRequest>> {
        if subject_domain.trim().is_empty() {
            return Err(CoordinatorError::Validation("missing subject domain".into()));
        }
        let body = json!({
            "action": "myprojects",
            "payload": {
                "request": "delete_request_details_teacher",
                "email_id": self.actor_email,
                "subject_domain": subject_domain,
            }
        });
        let response = self.invoke(&body).await?;
        let requests = extract_requests(&response)?;
        debug!(subject_domain, count = requests.len(), "Listed deletion requests");
        Ok(requests)
    }

    async fn approve_deletion_request(
        &self,
        request_id: &str,
        entity_type: EntityType,
    ) -> Result<ResolutionAck> {
        let body = json!({
            "action": "deleterequest",
            "payload": {
                "request": "teacher_approve",
                "actor": self.actor("teacher"),
                "ids": { "request_id": request_id, "entity_type": entity_type },
            }
        });
        let ack = extract_ack(&self.invoke(&body).await?)?;
        info!(request_id, %entity_type, success = ack.success, "Approve call finished");
        Ok(ack)
    }

    async fn reject_deletion_request(&self, request_id: &str) -> Result<ResolutionAck> {
        let body = json!({
            "action": "deleterequest",
            "payload": {
                "request": "teacher_reject",
                "actor": self.actor("teacher"),
                "ids": { "request_id": request_id },
            }
        });
        let ack = extract_ack(&self.invoke(&body).await?)?;
        info!(request_id, success = ack.success, "Reject call finished");
        Ok(ack)
    }

    async fn submit_deletion_request(
        &self,
        request: &NewDeletionRequest,
    ) -> Result<ResolutionAck> {
        request.validate()?;

        let mut ids = json!({
            "entity_type": request.entity_type,
            "project_id": request.project_id,
        });
        if let Some(stage_id) = &request.stage_id {
            ids["stage_id"] = json!(stage_id);
        }
        if let Some(task_id) = &request.task_id {
            ids["task_id"] = json!(task_id);
        }

        let mut payload = json!({
            "request": "student_request",
            "actor": self.actor("student"),
            "ids": ids,
        });
        if let Some(reason) = &request.reason {
            payload["reason"] = json!(reason);
        }

        let body = json!({ "action": "deleterequest", "payload": payload });
        let ack = extract_ack(&self.invoke(&body).await?)?;
        info!(
            entity_type = %request.entity_type,
            project_id = %request.project_id,
            success = ack.success,
            "Deletion request submitted"
        );
        Ok(ack)
    }
}
