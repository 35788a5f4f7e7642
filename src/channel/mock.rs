//! Scripted in-memory Channel for testing the job controller without a server.

use super::traits::{Channel, ChannelFrame, ChannelHandle};
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// What the next `open()` call does.
#[derive(Debug, Clone)]
pub enum MockScript {
    /// `open()` fails with a transport error.
    FailOpen(String),
    /// `open()` never completes.
    HangOpen,
    /// `open()` succeeds; each frame is delivered after its delay
    /// (measured from the moment the connection opened).
    Frames(Vec<(Duration, ChannelFrame)>),
}

impl MockScript {
    /// Handshake then a result, both delivered at `after`.
    pub fn reply_after(after: Duration, result: impl Into<String>) -> Self {
        MockScript::Frames(vec![
            (after, ChannelFrame::Message(r#"{"type":"connected"}"#.into())),
            (after, ChannelFrame::Message(result.into())),
        ])
    }

    /// Connection opens, then errors at `after`.
    pub fn error_after(after: Duration, message: impl Into<String>) -> Self {
        MockScript::Frames(vec![(after, ChannelFrame::Error(message.into()))])
    }

    /// Connection opens and stays silent.
    pub fn silent() -> Self {
        MockScript::Frames(Vec::new())
    }
}

#[derive(Default)]
struct MockState {
    scripts: VecDeque<MockScript>,
    opened: Vec<String>,
    writers: Vec<mpsc::UnboundedReceiver<String>>,
    sent: Vec<String>,
    tokens: Vec<CancellationToken>,
}

/// In-memory Channel driven by a queue of [`MockScript`]s.
///
/// When the queue is empty, `open()` yields a silent connection.
#[derive(Default)]
pub struct MockChannel {
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = MockScript>) -> Self {
        Self {
            state: Mutex::new(MockState {
                scripts: scripts.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub async fn push_script(&self, script: MockScript) {
        self.state.lock().await.scripts.push_back(script);
    }

    /// URLs passed to `open()`, in call order (including failed opens).
    pub async fn open_calls(&self) -> Vec<String> {
        self.state.lock().await.opened.clone()
    }

    /// Messages sent through any handle, in send order.
    pub async fn sent_messages(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut drained = Vec::new();
        for rx in state.writers.iter_mut() {
            while let Ok(msg) = rx.try_recv() {
                drained.push(msg);
            }
        }
        state.sent.extend(drained);
        state.sent.clone()
    }

    /// Handles that have not been closed yet.
    pub async fn live_connections(&self) -> usize {
        self.state
            .lock()
            .await
            .tokens
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn open(&self, url: &str) -> Result<ChannelHandle> {
        let script = {
            let mut state = self.state.lock().await;
            state.opened.push(url.to_string());
            state.scripts.pop_front().unwrap_or_else(MockScript::silent)
        };

        let frames = match script {
            MockScript::FailOpen(msg) => return Err(CoordinatorError::Transport(msg)),
            MockScript::HangOpen => std::future::pending().await,
            MockScript::Frames(frames) => frames,
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        {
            let mut state = self.state.lock().await;
            state.writers.push(out_rx);
            state.tokens.push(token.clone());
        }

        let delivery_token = token.clone();
        tokio::spawn(async move {
            let opened_at = tokio::time::Instant::now();
            for (delay, frame) in frames {
                tokio::select! {
                    _ = delivery_token.cancelled() => return,
                    _ = tokio::time::sleep_until(opened_at + delay) => {}
                }
                if in_tx.send(frame).is_err() {
                    return;
                }
            }
            // Keep the sender alive until closed so the stream does not end early.
            delivery_token.cancelled().await;
        });

        Ok(ChannelHandle::new(out_tx, in_rx, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_frames_delivered_on_schedule() {
        let channel = MockChannel::with_scripts([MockScript::reply_after(
            Duration::from_secs(3),
            "result",
        )]);
        let mut handle = channel.open("ws://mock").await.unwrap();
        let mut frames = handle.take_frames().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(frames.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(frames.try_recv(), Ok(ChannelFrame::Message(_))));
        assert_eq!(
            frames.try_recv().unwrap(),
            ChannelFrame::Message("result".into())
        );
    }

    #[tokio::test]
    async fn test_fail_open_and_call_log() {
        let channel = MockChannel::with_scripts([MockScript::FailOpen("refused".into())]);
        let err = channel.open("ws://a").await.unwrap_err();
        assert_eq!(err, CoordinatorError::Transport("refused".into()));
        assert_eq!(channel.open_calls().await, vec!["ws://a".to_string()]);
    }

    #[tokio::test]
    async fn test_sent_messages_and_live_connections() {
        let channel = MockChannel::new();
        let mut handle = channel.open("ws://b").await.unwrap();
        handle.send("one".into()).unwrap();
        handle.send("two".into()).unwrap();
        assert_eq!(channel.sent_messages().await, vec!["one", "two"]);
        assert_eq!(channel.live_connections().await, 1);

        handle.close();
        assert_eq!(channel.live_connections().await, 0);
    }
}
