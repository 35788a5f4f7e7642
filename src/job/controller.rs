//! AsyncJobController: drives one job over a [`Channel`] with an independent
//! timeout guard and bounded automatic retry.
//!
//! All state lives in the controller and is only mutated through `&mut self`.
//! Background activity (connect, channel pump, ticker, guard, retry delay)
//! runs in spawned tasks that post [`Signal`]s into an inbox; each signal
//! carries the epoch it was created under, and teardown bumps the epoch so
//! anything a retired attempt still has in flight is discarded on arrival.

use super::guard::{Ticker, TimeoutGuard};
use super::models::{
    JobConfig, JobRequest, JobResources, JobResult, JobSnapshot, JobState, StartKind,
};
use super::protocol;
use crate::channel::{Channel, ChannelFrame, ChannelHandle};
use crate::error::{CoordinatorError, Result};
use crate::events::{EventEmitter, EventKind, NullEmitter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Signal {
    Opened(ChannelHandle),
    OpenFailed(CoordinatorError),
    Frame(ChannelFrame),
    Tick,
    Warning,
    Timeout,
    RetryDue,
}

#[derive(Debug)]
struct Envelope {
    epoch: u64,
    signal: Signal,
}

/// Owns the single active job of a session.
pub struct AsyncJobController {
    config: JobConfig,
    channel: Arc<dyn Channel>,
    emitter: Arc<dyn EventEmitter>,

    state: JobState,
    job_id: Option<Uuid>,
    request: Option<JobRequest>,
    attempt: u32,
    start_kind: Option<StartKind>,
    started_at: Option<Instant>,
    started_at_utc: Option<DateTime<Utc>>,
    elapsed_secs: u64,
    warning_shown: bool,
    handshake_seen: bool,
    result: Option<JobResult>,
    last_error: Option<CoordinatorError>,

    epoch: u64,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: mpsc::UnboundedReceiver<Envelope>,

    // Resource handles; all `None`/disarmed after teardown.
    handle: Option<ChannelHandle>,
    connect_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    ticker: Option<Ticker>,
    guard: TimeoutGuard,
    retry_task: Option<JoinHandle<()>>,
}

impl AsyncJobController {
    pub fn new(config: JobConfig, channel: Arc<dyn Channel>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channel,
            emitter: Arc::new(NullEmitter),
            state: JobState::Idle,
            job_id: None,
            request: None,
            attempt: 0,
            start_kind: None,
            started_at: None,
            started_at_utc: None,
            elapsed_secs: 0,
            warning_shown: false,
            handshake_seen: false,
            result: None,
            last_error: None,
            epoch: 0,
            inbox_tx,
            inbox_rx,
            handle: None,
            connect_task: None,
            pump_task: None,
            ticker: None,
            guard: TimeoutGuard::new(),
            retry_task: None,
        }
    }

    /// Publish state changes through `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&CoordinatorError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id,
            state: self.state,
            attempt: self.attempt,
            start_kind: self.start_kind,
            started_at: self.started_at_utc,
            elapsed_secs: self.elapsed_secs,
            warning_threshold_secs: self.config.warning_threshold_secs,
            timeout_threshold_secs: self.config.timeout_threshold_secs,
            max_auto_retries: self.config.max_auto_retries,
            retry_pending: self.retry_task.is_some(),
            warning_shown: self.warning_shown,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    pub fn resources(&self) -> JobResources {
        JobResources {
            channel_open: self.handle.is_some(),
            connect_pending: self.connect_task.is_some(),
            pump_running: self.pump_task.is_some(),
            ticker_running: self.ticker.is_some(),
            guard_armed: self.guard.is_armed(),
            retry_pending: self.retry_task.is_some(),
        }
    }

    // ========================================================================
    // Caller operations
    // ========================================================================

    /// Submit a new job. Any previous job is torn down first.
    ///
    /// Validation happens before anything else: an invalid request leaves
    /// the controller exactly as it was.
    pub fn start(&mut self, request: JobRequest) -> Result<Uuid> {
        request.validate()?;
        let job_id = Uuid::new_v4();
        self.job_id = Some(job_id);
        self.begin_attempt(request, StartKind::Initial);
        Ok(job_id)
    }

    /// Re-run the timed-out job. Counts as a manual retry: the attempt
    /// counter resets and transport errors on this attempt are not retried.
    pub fn retry(&mut self) -> Result<()> {
        if self.state != JobState::TimedOut {
            return Err(self.invalid("retry"));
        }
        let request = self.request.clone().ok_or_else(|| self.invalid("retry"))?;
        self.attempt = 0;
        self.begin_attempt(request, StartKind::ManualRetry);
        Ok(())
    }

    /// Abandon the job. Mid-flight jobs end `Cancelled`, otherwise the
    /// controller returns to `Idle`.
    pub fn cancel(&mut self) {
        self.teardown();
        self.attempt = 0;
        if self.state.is_active() {
            info!(job_id = ?self.job_id, "Job cancelled");
            if let Some(job_id) = self.job_id {
                self.emitter.emit_kind(EventKind::JobCancelled { job_id });
            }
            self.transition(JobState::Cancelled);
        } else {
            self.transition(JobState::Idle);
        }
    }

    /// Return a settled job to `Idle`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(self.invalid("reset"));
        }
        self.teardown();
        self.attempt = 0;
        self.transition(JobState::Idle);
        Ok(())
    }

    // ========================================================================
    // Signal processing
    // ========================================================================

    /// Wait for and apply the next background signal.
    ///
    /// Returns `None` immediately when nothing is in flight.
    pub async fn process_next(&mut self) -> Option<JobState> {
        while self.state.is_active() {
            let envelope = self.inbox_rx.recv().await?;
            if self.apply(envelope) {
                return Some(self.state);
            }
        }
        None
    }

    /// Apply every signal already queued, without waiting.
    pub fn poll_signals(&mut self) -> JobState {
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            self.apply(envelope);
        }
        self.state
    }

    /// Drive the job until it leaves Connecting/Running.
    pub async fn run_until_settled(&mut self) -> JobState {
        while self.process_next().await.is_some() {}
        self.state
    }

    /// Returns false for signals from a retired epoch.
    fn apply(&mut self, envelope: Envelope) -> bool {
        if envelope.epoch != self.epoch {
            if let Signal::Opened(mut handle) = envelope.signal {
                handle.close();
            }
            return false;
        }
        match envelope.signal {
            Signal::Opened(handle) => self.on_opened(handle),
            Signal::OpenFailed(err) => self.on_transport_error(err),
            Signal::Frame(frame) => self.on_frame(frame),
            Signal::Tick => self.on_tick(),
            Signal::Warning => self.on_warning(),
            Signal::Timeout => self.on_timeout(),
            Signal::RetryDue => self.on_retry_due(),
        }
        true
    }

    fn on_opened(&mut self, mut handle: ChannelHandle) {
        self.connect_task = None;
        let Some(request) = self.request.as_ref() else {
            handle.close();
            return;
        };
        let sent = protocol::encode_request(&self.config.action, request)
            .and_then(|frame| handle.send(frame));
        if let Err(err) = sent {
            handle.close();
            self.on_transport_error(err);
            return;
        }

        if let Some(frames) = handle.take_frames() {
            let tx = self.inbox_tx.clone();
            let epoch = self.epoch;
            self.pump_task = Some(tokio::spawn(pump(frames, tx, epoch)));
        }
        debug!(job_id = ?self.job_id, channel_id = %handle.id(), "Channel open, request sent");
        self.handle = Some(handle);
        self.transition(JobState::Running);
    }

    fn on_frame(&mut self, frame: ChannelFrame) {
        match frame {
            ChannelFrame::Message(text) => {
                // Hard timeout wins over a result that lands after the threshold.
                if self.current_elapsed() >= self.config.timeout() {
                    self.on_timeout();
                    return;
                }
                if !self.handshake_seen {
                    self.handshake_seen = true;
                    debug!(job_id = ?self.job_id, "Handshake frame discarded");
                    return;
                }
                match protocol::decode_result(&text, &self.config.result_field) {
                    Ok(result) => self.on_success(result),
                    Err(err) => self.on_failure(err),
                }
            }
            ChannelFrame::Error(message) => {
                self.on_transport_error(CoordinatorError::Transport(message));
            }
            ChannelFrame::Closed { clean, reason } => {
                if clean {
                    debug!(job_id = ?self.job_id, ?reason, "Channel closed");
                } else {
                    warn!(job_id = ?self.job_id, ?reason, "Channel closed uncleanly");
                }
                self.handle = None;
                self.pump_task = None;
            }
        }
    }

    fn on_tick(&mut self) {
        self.elapsed_secs = self.current_elapsed().as_secs();
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobTick {
                job_id,
                elapsed_secs: self.elapsed_secs,
            });
        }
    }

    fn on_warning(&mut self) {
        self.warning_shown = true;
        let elapsed = self.current_elapsed().as_secs();
        let remaining = self.config.timeout_threshold_secs.saturating_sub(elapsed);
        warn!(job_id = ?self.job_id, elapsed, remaining, "Job is taking longer than expected");
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobWarning {
                job_id,
                elapsed_secs: elapsed,
                remaining_secs: remaining,
            });
        }
    }

    fn on_timeout(&mut self) {
        self.teardown();
        self.elapsed_secs = self.config.timeout_threshold_secs;
        warn!(
            job_id = ?self.job_id,
            attempt = self.attempt,
            elapsed_secs = self.elapsed_secs,
            "Job timed out; waiting for retry or cancel"
        );
        self.last_error = Some(CoordinatorError::Timeout {
            elapsed_secs: self.elapsed_secs,
        });
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobTimedOut {
                job_id,
                elapsed_secs: self.elapsed_secs,
            });
        }
        self.transition(JobState::TimedOut);
    }

    fn on_success(&mut self, result: JobResult) {
        self.teardown();
        info!(job_id = ?self.job_id, attempt = self.attempt, "Job succeeded");
        self.attempt = 0;
        self.last_error = None;
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobSucceeded {
                job_id,
                result: result.value.clone(),
            });
        }
        self.result = Some(result);
        self.transition(JobState::Succeeded);
    }

    fn on_failure(&mut self, err: CoordinatorError) {
        self.teardown();
        warn!(job_id = ?self.job_id, attempt = self.attempt, error = %err, "Job failed");
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobFailed {
                job_id,
                error_kind: err.kind().to_string(),
                message: err.to_string(),
            });
        }
        self.last_error = Some(err);
        self.transition(JobState::Failed);
    }

    fn on_transport_error(&mut self, err: CoordinatorError) {
        let manual = self.start_kind == Some(StartKind::ManualRetry);
        if self.attempt >= self.config.max_auto_retries || manual {
            self.on_failure(err);
            return;
        }

        self.teardown();
        self.attempt += 1;
        let delay = self.config.retry_delay();
        info!(
            job_id = ?self.job_id,
            attempt = self.attempt,
            max_auto_retries = self.config.max_auto_retries,
            error = %err,
            "Transport error, retrying in {}s",
            delay.as_secs()
        );
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobRetryScheduled {
                job_id,
                attempt: self.attempt,
                max_auto_retries: self.config.max_auto_retries,
                delay_secs: delay.as_secs(),
            });
        }
        self.last_error = Some(err);
        self.transition(JobState::Connecting);

        let tx = self.inbox_tx.clone();
        let epoch = self.epoch;
        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Envelope {
                epoch,
                signal: Signal::RetryDue,
            });
        }));
    }

    fn on_retry_due(&mut self) {
        self.retry_task = None;
        if let Some(request) = self.request.clone() {
            self.begin_attempt(request, StartKind::AutoRetry);
        }
    }

    // ========================================================================
    // Attempt lifecycle
    // ========================================================================

    fn begin_attempt(&mut self, request: JobRequest, kind: StartKind) {
        self.teardown();
        if kind == StartKind::Initial {
            self.attempt = 0;
        }
        self.start_kind = Some(kind);
        self.request = Some(request);
        self.result = None;
        self.last_error = None;
        self.handshake_seen = false;
        self.warning_shown = false;
        self.elapsed_secs = 0;
        self.started_at = Some(Instant::now());
        self.started_at_utc = Some(Utc::now());

        info!(
            job_id = ?self.job_id,
            attempt = self.attempt,
            kind = ?kind,
            endpoint = %self.config.endpoint_url,
            "Starting job attempt"
        );
        self.transition(JobState::Connecting);

        let epoch = self.epoch;

        let tx = self.inbox_tx.clone();
        self.ticker = Some(Ticker::start(TICK_PERIOD, move || {
            let _ = tx.send(Envelope {
                epoch,
                signal: Signal::Tick,
            });
        }));

        let warn_tx = self.inbox_tx.clone();
        let timeout_tx = self.inbox_tx.clone();
        self.guard.arm(
            self.config.warning(),
            self.config.timeout(),
            move || {
                let _ = warn_tx.send(Envelope {
                    epoch,
                    signal: Signal::Warning,
                });
            },
            move || {
                let _ = timeout_tx.send(Envelope {
                    epoch,
                    signal: Signal::Timeout,
                });
            },
        );

        let channel = self.channel.clone();
        let url = self.config.endpoint_url.clone();
        let tx = self.inbox_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let signal = match channel.open(&url).await {
                Ok(handle) => Signal::Opened(handle),
                Err(err) => Signal::OpenFailed(err),
            };
            let _ = tx.send(Envelope { epoch, signal });
        }));
    }

    /// Release every resource the current attempt holds. Idempotent.
    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        self.guard.disarm();
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn transition(&mut self, to: JobState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(job_id = ?self.job_id, %from, %to, attempt = self.attempt, "Job state changed");
        if let Some(job_id) = self.job_id {
            self.emitter.emit_kind(EventKind::JobStateChanged {
                job_id,
                from,
                to,
                attempt: self.attempt,
            });
        }
    }

    fn current_elapsed(&self) -> Duration {
        self.started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn invalid(&self, action: &str) -> CoordinatorError {
        CoordinatorError::InvalidTransition {
            from: self.state.to_string(),
            action: action.to_string(),
        }
    }
}

impl Drop for AsyncJobController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Forward channel frames into the controller inbox under `epoch`.
async fn pump(
    mut frames: mpsc::UnboundedReceiver<ChannelFrame>,
    tx: mpsc::UnboundedSender<Envelope>,
    epoch: u64,
) {
    while let Some(frame) = frames.recv().await {
        let last = !matches!(frame, ChannelFrame::Message(_));
        if tx
            .send(Envelope {
                epoch,
                signal: Signal::Frame(frame),
            })
            .is_err()
            || last
        {
            break;
        }
    }
}
