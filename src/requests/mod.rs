//! Deletion requests: wire types, local store and the review backend.

mod client;
pub mod mock;
mod models;
mod store;
mod traits;

pub use client::{HttpReviewBackend, ReviewConfig};
pub use models::{
    extract_ack, extract_requests, DeletionRequest, EntityType, NewDeletionRequest,
    RequestStatus, ResolutionAck,
};
pub use store::RequestStore;
pub use traits::ReviewBackend;
