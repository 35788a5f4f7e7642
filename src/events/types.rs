//! Coordinator event types

use crate::job::JobState;
use crate::requests::EntityType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened. Job and overlay notifications share one stream so a
/// single subscriber (UI, logger, test) sees them in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    // ── Job lifecycle ────────────────────────────────────────────────
    JobStateChanged {
        job_id: Uuid,
        from: JobState,
        to: JobState,
        attempt: u32,
    },
    JobTick {
        job_id: Uuid,
        elapsed_secs: u64,
    },
    /// Non-fatal: the job is still running but close to its hard timeout.
    JobWarning {
        job_id: Uuid,
        elapsed_secs: u64,
        remaining_secs: u64,
    },
    JobRetryScheduled {
        job_id: Uuid,
        attempt: u32,
        max_auto_retries: u32,
        delay_secs: u64,
    },
    JobSucceeded {
        job_id: Uuid,
        result: serde_json::Value,
    },
    JobFailed {
        job_id: Uuid,
        error_kind: String,
        message: String,
    },
    /// Requires an explicit retry or cancel from the caller.
    JobTimedOut {
        job_id: Uuid,
        elapsed_secs: u64,
    },
    JobCancelled {
        job_id: Uuid,
    },

    // ── Overlay reconciliation ───────────────────────────────────────
    OverlayOptimistic {
        request_id: String,
        entity_type: EntityType,
        entity_id: String,
    },
    OverlayCommitted {
        request_id: String,
        entity_type: EntityType,
        entity_id: String,
        removed: bool,
    },
    OverlayRolledBack {
        request_id: String,
        reason: String,
    },
    OverlayConflict {
        request_id: String,
        status: String,
    },
    StoreRefreshed {
        pending: usize,
        excluded: usize,
    },
    CursorClamped {
        project_id: String,
        from: usize,
        to: usize,
    },
}

/// An event emitted by a coordinator component.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl CoordinatorEvent {
    /// Create a new event stamped with the current time
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// The job this event belongs to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match &self.kind {
            EventKind::JobStateChanged { job_id, .. }
            | EventKind::JobTick { job_id, .. }
            | EventKind::JobWarning { job_id, .. }
            | EventKind::JobRetryScheduled { job_id, .. }
            | EventKind::JobSucceeded { job_id, .. }
            | EventKind::JobFailed { job_id, .. }
            | EventKind::JobTimedOut { job_id, .. }
            | EventKind::JobCancelled { job_id } => Some(*job_id),
            _ => None,
        }
    }
}

/// Sink for coordinator events.
///
/// Fire-and-forget: implementations must never block or panic, and must
/// tolerate having no listeners.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: CoordinatorEvent);

    fn emit_kind(&self, kind: EventKind) {
        self.emit(CoordinatorEvent::new(kind));
    }
}

/// Emitter that discards everything (default when no bus is wired).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: CoordinatorEvent) {}
}
