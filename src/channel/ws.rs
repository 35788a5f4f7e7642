//! WebSocket implementation of [`Channel`] on top of tokio-tungstenite.

use super::traits::{Channel, ChannelFrame, ChannelHandle};
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens `ws://` / `wss://` connections.
#[derive(Debug, Clone, Default)]
pub struct WsChannel;

impl WsChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn open(&self, url: &str) -> Result<ChannelHandle> {
        let (ws, _response) = connect_async(url).await?;
        info!(url = %url, "WebSocket connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ChannelFrame>();
        let shutdown = CancellationToken::new();

        // Writer: drains the outbound queue, sends a close frame on shutdown.
        let writer_token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_token.cancelled() => break,
                    next = out_rx.recv() => match next {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!("WebSocket send failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        // Reader: forwards frames until the socket ends or we are told to stop.
        let reader_token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_token.cancelled() => break,
                    next = stream.next() => next,
                };
                let frame = match next {
                    Some(Ok(Message::Text(text))) => ChannelFrame::Message(text),
                    Some(Ok(Message::Binary(bytes))) => {
                        ChannelFrame::Message(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let clean = frame
                            .as_ref()
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(ChannelFrame::Closed { clean, reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = in_tx.send(ChannelFrame::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = in_tx.send(ChannelFrame::Closed {
                            clean: false,
                            reason: Some("stream ended".into()),
                        });
                        break;
                    }
                };
                if in_tx.send(frame).is_err() {
                    break;
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(ChannelHandle::new(out_tx, in_rx, shutdown))
    }
}
