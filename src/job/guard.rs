//! Wall-clock timers that run independently of channel activity.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Fires a warning and then a hard timeout on a fixed schedule.
///
/// Callbacks run on a spawned task; they should only enqueue work.
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    task: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the guard, replacing any previous schedule. A `warning` at or
    /// beyond `hard` is never fired.
    pub fn arm<W, T>(&mut self, warning: Duration, hard: Duration, on_warning: W, on_timeout: T)
    where
        W: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.disarm();
        let armed_at = Instant::now();
        self.task = Some(tokio::spawn(async move {
            if warning < hard {
                tokio::time::sleep_until(armed_at + warning).await;
                on_warning();
            }
            tokio::time::sleep_until(armed_at + hard).await;
            on_timeout();
        }));
        debug!(
            warning_secs = warning.as_secs(),
            hard_secs = hard.as_secs(),
            "Timeout guard armed"
        );
    }

    /// Cancel pending timers. No-op when not armed.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// 1 Hz elapsed-time ticker.
#[derive(Debug)]
pub struct Ticker {
    task: JoinHandle<()>,
}

impl Ticker {
    /// Start ticking every `period`, first tick one period from now.
    pub fn start<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                on_tick();
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
