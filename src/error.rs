//! Error taxonomy shared by the job controller and the overlay reconciler.
//!
//! Every variant is terminal for the attempt that produced it: callers always
//! see it *after* teardown (job side) or rollback (overlay side) has run, so
//! no error leaves a job or a project tree half-mutated.

use thiserror::Error;

/// Errors surfaced by the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Malformed or incomplete submission, rejected before any I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Channel open/send/receive failure or a non-2xx HTTP response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A received message did not match the expected schema.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The hard timeout elapsed before a result arrived.
    #[error("Job timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// The targeted request is no longer pending (resolved elsewhere).
    #[error("Deletion request {request_id} is no longer pending ({status})")]
    ReconciliationConflict { request_id: String, status: String },

    /// The backend answered the confirmation call with `success: false`.
    #[error("Backend rejected the confirmation: {message}")]
    ConfirmRejected { message: String },

    /// The request id is not known to the local store.
    #[error("Deletion request {0} not found")]
    RequestNotFound(String),

    /// An entity addressed by id is not present in the tree.
    #[error("{entity_type} {entity_id} not found")]
    EntityNotFound {
        entity_type: String,
        entity_id: String,
    },

    /// An operation was invoked from a state that does not allow it.
    #[error("Cannot {action} while job is {from}")]
    InvalidTransition { from: String, action: String },

    /// Invalid configuration values.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoordinatorError {
    /// Only transport failures are eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Transport(_))
    }

    /// Conflicts are reported as notices, not failures.
    pub fn is_notice(&self) -> bool {
        matches!(self, CoordinatorError::ReconciliationConflict { .. })
    }

    /// Short machine-readable tag, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "validation",
            CoordinatorError::Transport(_) => "transport",
            CoordinatorError::Protocol(_) => "protocol",
            CoordinatorError::Timeout { .. } => "timeout",
            CoordinatorError::ReconciliationConflict { .. } => "reconciliation_conflict",
            CoordinatorError::ConfirmRejected { .. } => "confirm_rejected",
            CoordinatorError::RequestNotFound(_) => "request_not_found",
            CoordinatorError::EntityNotFound { .. } => "entity_not_found",
            CoordinatorError::InvalidTransition { .. } => "invalid_transition",
            CoordinatorError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        CoordinatorError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CoordinatorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CoordinatorError::Transport(e.to_string())
    }
}

/// Result alias for coordination-layer operations.
pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;
