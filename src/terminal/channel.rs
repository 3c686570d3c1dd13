//! In-memory duplex message channel
//!
//! Connects a session to whatever carries frames to the real client (the
//! CLI's JSON-lines bridge, a WebSocket server, a test). The session side
//! implements the channel ports; the client side is a plain pair of queues.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::protocol::ServerMessage;
use crate::classify::MessageCode;
use crate::error::{BridgeError, Result};
use crate::ports::{MessageSink, MessageSource};

/// Largest inbound message accepted by default, in bytes
pub const DEFAULT_READ_LIMIT: usize = 64 * 1024;

const INBOUND_CAPACITY: usize = 64;

/// What the client side receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(ServerMessage),
    Close(MessageCode),
}

/// Create a connected pair of session and client ends.
#[must_use]
pub fn duplex(read_limit: usize) -> (SessionSource, SessionSink, ClientEnd) {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let source = SessionSource {
        rx: inbound_rx,
        read_limit,
        closed: closed.clone(),
    };
    let sink = SessionSink {
        tx: Mutex::new(Some(outbound_tx)),
        closed,
    };
    let client = ClientEnd {
        tx: inbound_tx,
        rx: outbound_rx,
    };
    (source, sink, client)
}

/// Receiving half owned by the session's input task
#[derive(Debug)]
pub struct SessionSource {
    rx: mpsc::Receiver<String>,
    read_limit: usize,
    closed: CancellationToken,
}

#[async_trait]
impl MessageSource for SessionSource {
    async fn recv(&mut self) -> Result<Option<String>> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::ChannelClosed);
        }
        let text = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(BridgeError::ChannelClosed),
            text = self.rx.recv() => text,
        };
        match text {
            Some(text) if text.len() > self.read_limit => {
                debug!(size = text.len(), limit = self.read_limit, "Inbound message over read limit");
                Err(BridgeError::ReadLimitExceeded {
                    limit: self.read_limit,
                })
            }
            other => Ok(other),
        }
    }
}

/// Sending half shared by the session tasks
#[derive(Debug)]
pub struct SessionSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    closed: CancellationToken,
}

impl SessionSink {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl MessageSink for SessionSink {
    async fn send(&self, message: &ServerMessage) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx
                .send(Frame::Message(message.clone()))
                .map_err(|_| BridgeError::ChannelClosed),
            None => Err(BridgeError::ChannelClosed),
        }
    }

    async fn close(&self, reason: MessageCode) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            debug!(reason = %reason, "Closing session channel");
            let _ = tx.send(Frame::Close(reason));
            self.closed.cancel();
        }
    }
}

/// The client's end: send raw text, receive frames
#[derive(Debug)]
pub struct ClientEnd {
    tx: mpsc::Sender<String>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ClientEnd {
    /// Send one raw text message to the session.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` once the session side is gone.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(text.into())
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Next frame from the session, `None` after the close frame.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (mpsc::Sender<String>, mpsc::UnboundedReceiver<Frame>) {
        (self.tx, self.rx)
    }
}
