//! Job configuration, request and state types.

use crate::error::{CoordinatorError, Result};
use crate::tree::Project;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_SECS: u64 = 65;
pub const DEFAULT_WARNING_SECS: u64 = 55;
pub const DEFAULT_MAX_AUTO_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
/// Upper bound for every timing setting; keeps deadline arithmetic in range.
pub const MAX_TIMING_SECS: u64 = 24 * 60 * 60;

/// Lifecycle state of the active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Connecting,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    /// Connecting or Running: resources are live and signals are expected.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Connecting | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Connecting => "connecting",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How an attempt was started. Only `Initial` and `AutoRetry` attempts are
/// eligible for automatic retry on transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartKind {
    Initial,
    AutoRetry,
    ManualRetry,
}

/// Timing and endpoint settings for jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub endpoint_url: String,
    /// Value of the `action` field in the request frame
    pub action: String,
    /// Name of the field under `body.action_response.response` holding the result
    pub result_field: String,
    pub timeout_threshold_secs: u64,
    pub warning_threshold_secs: u64,
    pub max_auto_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "wss://localhost:8443/".into(),
            action: "createproject".into(),
            result_field: "project".into(),
            timeout_threshold_secs: DEFAULT_TIMEOUT_SECS,
            warning_threshold_secs: DEFAULT_WARNING_SECS,
            max_auto_retries: DEFAULT_MAX_AUTO_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_threshold_secs == 0 {
            return Err(CoordinatorError::Config(
                "timeout_threshold_secs must be greater than zero".into(),
            ));
        }
        if self.warning_threshold_secs >= self.timeout_threshold_secs {
            return Err(CoordinatorError::Config(format!(
                "warning_threshold_secs ({}) must be below timeout_threshold_secs ({})",
                self.warning_threshold_secs, self.timeout_threshold_secs
            )));
        }
        for (name, secs) in [
            ("timeout_threshold_secs", self.timeout_threshold_secs),
            ("retry_delay_secs", self.retry_delay_secs),
        ] {
            if secs > MAX_TIMING_SECS {
                return Err(CoordinatorError::Config(format!(
                    "{} ({}) exceeds the maximum of {}s",
                    name, secs, MAX_TIMING_SECS
                )));
            }
        }
        if self.endpoint_url.trim().is_empty() {
            return Err(CoordinatorError::Config("endpoint_url is empty".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_threshold_secs)
    }

    pub fn warning(&self) -> Duration {
        Duration::from_secs(self.warning_threshold_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// What the caller submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub subject: String,
    pub message: String,
    pub target: String,
}

impl JobRequest {
    pub fn new(
        subject: impl Into<String>,
        message: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            target: target.into(),
        }
    }

    /// Required fields must be present and non-blank.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("subject", &self.subject),
            ("message", &self.message),
            ("target", &self.target),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoordinatorError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// Successful job payload (the nested result object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobResult {
    pub value: serde_json::Value,
}

impl JobResult {
    pub fn into_project(self) -> Result<Project> {
        serde_json::from_value(self.value)
            .map_err(|e| CoordinatorError::Protocol(format!("result is not a project: {}", e)))
    }
}

/// Read-only view of the controller, published to presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: Option<Uuid>,
    pub state: JobState,
    pub attempt: u32,
    pub start_kind: Option<StartKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    pub warning_threshold_secs: u64,
    pub timeout_threshold_secs: u64,
    pub max_auto_retries: u32,
    pub retry_pending: bool,
    pub warning_shown: bool,
    pub last_error: Option<String>,
}

/// Which resource handles are currently held. All false after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobResources {
    pub channel_open: bool,
    pub connect_pending: bool,
    pub pump_running: bool,
    pub ticker_running: bool,
    pub guard_armed: bool,
    pub retry_pending: bool,
}

impl JobResources {
    pub fn all_released(&self) -> bool {
        *self == JobResources::default()
    }
}

/// Format elapsed seconds as `m:ss`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
