//! Long-running job submission.
//!
//! `AsyncJobController` composes a [`crate::channel::Channel`] with a
//! [`TimeoutGuard`] into one job lifecycle:
//! `Idle → Connecting → Running → {Succeeded, Failed, TimedOut, Cancelled}`.

mod controller;
mod guard;
mod models;
pub mod protocol;

pub use controller::AsyncJobController;
pub use guard::{Ticker, TimeoutGuard};
pub use models::{
    format_elapsed, JobConfig, JobRequest, JobResources, JobResult, JobSnapshot, JobState,
    StartKind, DEFAULT_MAX_AUTO_RETRIES, DEFAULT_RETRY_DELAY_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_WARNING_SECS, MAX_TIMING_SECS,
};
