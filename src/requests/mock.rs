//! In-memory mock implementation of ReviewBackend for testing without a real API.

use super::models::{
    DeletionRequest, EntityType, NewDeletionRequest, RequestStatus, ResolutionAck,
};
use super::traits::ReviewBackend;
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    List { subject_domain: String },
    Approve { request_id: String, entity_type: EntityType },
    Reject { request_id: String },
    Submit(NewDeletionRequest),
}

/// Scripted answer for the next approve or reject call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Ack(ResolutionAck),
    Fail(CoordinatorError),
}

/// In-memory review backend.
///
/// Holds the server-side truth in a `Vec` behind an async `RwLock`.
/// Approve/reject update that truth unless a scripted outcome says
/// otherwise. `freeze_listing` pins what `list_deletion_requests` returns,
/// which models a backend whose reads lag behind its writes. Once any
/// project is mapped to a subject domain, listings only return requests
/// of projects in the listed domain.
///
/// ```
/// use review_coordinator::requests::mock::MockReviewBackend;
/// use review_coordinator::requests::{DeletionRequest, EntityType, RequestStatus, ReviewBackend};
///
/// # tokio_test::block_on(async {
/// let backend = MockReviewBackend::with_requests([
///     DeletionRequest::pending("r-1", EntityType::Stage, "p1").with_stage("s1"),
/// ]);
/// backend.reject_deletion_request("r-1").await.unwrap();
/// assert_eq!(backend.server_status("r-1").await, Some(RequestStatus::Rejected));
/// # });
/// ```
#[derive(Default)]
pub struct MockReviewBackend {
    requests: RwLock<Vec<DeletionRequest>>,
    frozen_listing: RwLock<Option<Vec<DeletionRequest>>>,
    outcomes: RwLock<VecDeque<MockOutcome>>,
    list_failures: RwLock<VecDeque<CoordinatorError>>,
    calls: RwLock<Vec<MockCall>>,
    /// project_id -> subject domain
    project_domains: RwLock<HashMap<String, String>>,
}

impl MockReviewBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(requests: impl IntoIterator<Item = DeletionRequest>) -> Self {
        Self {
            requests: RwLock::new(requests.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Place a project in a subject domain for listing purposes.
    pub fn with_project_domain(
        mut self,
        project_id: impl Into<String>,
        subject_domain: impl Into<String>,
    ) -> Self {
        self.project_domains
            .get_mut()
            .insert(project_id.into(), subject_domain.into());
        self
    }

    pub async fn set_requests(&self, requests: Vec<DeletionRequest>) {
        *self.requests.write().await = requests;
    }

    /// Change the server-side status of one request (e.g. another reviewer
    /// resolved it).
    pub async fn set_status(&self, request_id: &str, status: RequestStatus) {
        if let Some(r) = self
            .requests
            .write()
            .await
            .iter_mut()
            .find(|r| r.request_id == request_id)
        {
            r.status = status;
        }
    }

    /// Serve the current requests from listings from now on, whatever
    /// approvals happen afterwards.
    pub async fn freeze_listing(&self) {
        let snapshot = self.requests.read().await.clone();
        *self.frozen_listing.write().await = Some(snapshot);
    }

    pub async fn unfreeze_listing(&self) {
        *self.frozen_listing.write().await = None;
    }

    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes.write().await.push_back(outcome);
    }

    pub async fn push_list_failure(&self, error: CoordinatorError) {
        self.list_failures.write().await.push_back(error);
    }

    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.read().await.clone()
    }

    pub async fn server_status(&self, request_id: &str) -> Option<RequestStatus> {
        self.requests
            .read()
            .await
            .iter()
            .find(|r| r.request_id == request_id)
            .map(|r| r.status)
    }

    async fn resolve(&self, request_id: &str, to: RequestStatus) -> Result<ResolutionAck> {
        if let Some(outcome) = self.outcomes.write().await.pop_front() {
            return match outcome {
                MockOutcome::Ack(ack) => {
                    if ack.success {
                        self.set_status(request_id, to).await;
                    }
                    Ok(ack)
                }
                MockOutcome::Fail(err) => Err(err),
            };
        }

        let mut requests = self.requests.write().await;
        match requests.iter_mut().find(|r| r.request_id == request_id) {
            Some(r) if r.is_pending() => {
                r.status = to;
                Ok(ResolutionAck::ok())
            }
            Some(r) => Ok(ResolutionAck::refused(format!(
                "request {} is already {}",
                request_id, r.status
            ))),
            None => Ok(ResolutionAck::refused(format!(
                "request {} not found",
                request_id
            ))),
        }
    }
}

#[async_trait]
impl ReviewBackend for MockReviewBackend {
    async fn list_deletion_requests(&self, subject_domain: &str) -> Result<Vec<DeletionRequest>> {
        self.calls.write().await.push(MockCall::List {
            subject_domain: subject_domain.to_string(),
        });
        if let Some(err) = self.list_failures.write().await.pop_front() {
            return Err(err);
        }
        let frozen = self.frozen_listing.read().await.clone();
        let listing = match frozen {
            Some(listing) => listing,
            None => self.requests.read().await.clone(),
        };

        let domains = self.project_domains.read().await;
        if domains.is_empty() {
            return Ok(listing);
        }
        Ok(listing
            .into_iter()
            .filter(|r| {
                r.project_id
                    .as_ref()
                    .and_then(|p| domains.get(p))
                    .is_some_and(|d| d == subject_domain)
            })
            .collect())
    }

    async fn approve_deletion_request(
        &self,
        request_id: &str,
        entity_type: EntityType,
    ) -> Result<ResolutionAck> {
        self.calls.write().await.push(MockCall::Approve {
            request_id: request_id.to_string(),
            entity_type,
        });
        self.resolve(request_id, RequestStatus::Approved).await
    }

    async fn reject_deletion_request(&self, request_id: &str) -> Result<ResolutionAck> {
        self.calls.write().await.push(MockCall::Reject {
            request_id: request_id.to_string(),
        });
        self.resolve(request_id, RequestStatus::Rejected).await
    }

    async fn submit_deletion_request(
        &self,
        request: &NewDeletionRequest,
    ) -> Result<ResolutionAck> {
        request.validate()?;
        self.calls
            .write()
            .await
            .push(MockCall::Submit(request.clone()));

        let mut requests = self.requests.write().await;
        let request_id = format!("req-{}", requests.len() + 1);
        requests.push(DeletionRequest {
            request_id: request_id.clone(),
            entity_type: request.entity_type,
            project_id: Some(request.project_id.clone()),
            stage_id: request.stage_id.clone(),
            task_id: request.task_id.clone(),
            status: RequestStatus::Pending,
            reason: request.reason.clone(),
            requested_by: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        });
        Ok(ResolutionAck {
            success: true,
            message: Some(request_id),
        })
    }
}
