//! Trait abstraction for the review backend.

use super::models::{DeletionRequest, EntityType, NewDeletionRequest, ResolutionAck};
use crate::error::Result;
use async_trait::async_trait;

/// Request/response calls used to list and resolve deletion requests.
///
/// Implemented by [`super::HttpReviewBackend`] and, for tests,
/// [`super::mock::MockReviewBackend`].
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// List deletion requests for one subject domain.
    async fn list_deletion_requests(&self, subject_domain: &str) -> Result<Vec<DeletionRequest>>;

    /// Approve a pending request. `success: false` means the backend
    /// refused it (for example because it was already resolved).
    async fn approve_deletion_request(
        &self,
        request_id: &str,
        entity_type: EntityType,
    ) -> Result<ResolutionAck>;

    async fn reject_deletion_request(&self, request_id: &str) -> Result<ResolutionAck>;

    /// File a new request. Implementations validate before any I/O.
    async fn submit_deletion_request(&self, request: &NewDeletionRequest)
        -> Result<ResolutionAck>;
}
