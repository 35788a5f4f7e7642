//! Channel abstraction: a duplex, message-oriented connection.

use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Inbound event delivered by an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    /// A text payload from the remote side.
    Message(String),
    /// A receive-side transport failure. The channel is unusable afterwards.
    Error(String),
    /// The remote side (or the network) closed the connection.
    Closed { clean: bool, reason: Option<String> },
}

/// Opens connections to a remote job endpoint.
///
/// Implementations must be cheap to share (`Arc<dyn Channel>`): the job
/// controller opens connections from a spawned task so that a hanging
/// connect never blocks timeout arbitration.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Connect to `url`. A failed connect is a `Transport` error.
    async fn open(&self, url: &str) -> Result<ChannelHandle>;
}

/// An open (or formerly open) connection.
///
/// `close()` is idempotent and dropping the handle closes it, so a handle
/// can never outlive the job that owns it.
#[derive(Debug)]
pub struct ChannelHandle {
    id: Uuid,
    outbound: Option<mpsc::UnboundedSender<String>>,
    frames: Option<mpsc::UnboundedReceiver<ChannelFrame>>,
    shutdown: CancellationToken,
}

impl ChannelHandle {
    /// Assemble a handle from the pieces a transport implementation owns:
    /// the outbound queue its writer drains, the inbound frame queue its
    /// reader fills, and the token that stops both.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        frames: mpsc::UnboundedReceiver<ChannelFrame>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound: Some(outbound),
            frames: Some(frames),
            shutdown,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a text message for sending.
    pub fn send(&self, message: String) -> Result<()> {
        match &self.outbound {
            Some(tx) if !self.shutdown.is_cancelled() => tx
                .send(message)
                .map_err(|_| CoordinatorError::Transport("channel writer has stopped".into())),
            _ => Err(CoordinatorError::Transport("channel is closed".into())),
        }
    }

    /// Take the inbound frame stream. Returns `None` after the first call.
    pub fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelFrame>> {
        self.frames.take()
    }

    /// Close the connection. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(channel_id = %self.id, "Closing channel");
        }
        self.frames = None;
        self.shutdown.cancel();
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && !self.shutdown.is_cancelled()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (
        ChannelHandle,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<ChannelFrame>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        (ChannelHandle::new(out_tx, in_rx, token.clone()), out_rx, in_tx, token)
    }

    #[test]
    fn test_send_reaches_writer() {
        let (h, mut out_rx, _in_tx, _token) = handle();
        h.send("hello".into()).unwrap();
        assert_eq!(out_rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut h, _out_rx, _in_tx, token) = handle();
        assert!(h.is_open());
        h.close();
        h.close();
        assert!(!h.is_open());
        assert!(token.is_cancelled());
        assert!(h.send("late".into()).is_err());
    }

    #[test]
    fn test_take_frames_once() {
        let (mut h, _out_rx, in_tx, _token) = handle();
        let mut frames = h.take_frames().unwrap();
        assert!(h.take_frames().is_none());
        in_tx.send(ChannelFrame::Message("x".into())).unwrap();
        assert_eq!(frames.try_recv().unwrap(), ChannelFrame::Message("x".into()));
    }

    #[test]
    fn test_drop_cancels_transport() {
        let (h, _out_rx, _in_tx, token) = handle();
        drop(h);
        assert!(token.is_cancelled());
    }
}
