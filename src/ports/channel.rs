//! Duplex Message Channel Port
//!
//! The client-facing side of a session, split into a receiving half owned
//! by the input task and a shared sending half.

use async_trait::async_trait;

use crate::classify::MessageCode;
use crate::error::Result;
use crate::terminal::ServerMessage;

/// Receiving half of the client channel.
#[async_trait]
pub trait MessageSource: Send {
    /// Next raw text message, or `None` once the client has gone away.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ReadLimitExceeded` for an oversized message and
    /// `BridgeError::ChannelClosed` if the channel was closed by the engine.
    async fn recv(&mut self) -> Result<Option<String>>;
}

/// Sending half of the client channel.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ChannelClosed` once the channel is closed.
    async fn send(&self, message: &ServerMessage) -> Result<()>;

    /// Close the channel with a reason. Closing twice is a no-op.
    async fn close(&self, reason: MessageCode);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::BridgeError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Source replaying a fixed list of messages, then reporting closure.
    #[derive(Default)]
    pub struct ScriptedSource {
        messages: VecDeque<Result<Option<String>>>,
    }

    impl ScriptedSource {
        #[must_use]
        pub fn new(messages: &[&str]) -> Self {
            Self {
                messages: messages
                    .iter()
                    .map(|m| Ok(Some((*m).to_string())))
                    .collect(),
            }
        }

        #[must_use]
        pub fn failing(error: BridgeError) -> Self {
            Self {
                messages: VecDeque::from([Err(error)]),
            }
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn recv(&mut self) -> Result<Option<String>> {
            self.messages.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Sink recording everything sent and the close reason.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<ServerMessage>>,
        pub closed: Mutex<Vec<MessageCode>>,
        pub fail_sends: bool,
    }

    impl RecordingSink {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail_sends: true,
                ..Self::default()
            }
        }

        #[must_use]
        pub fn sent(&self) -> Vec<ServerMessage> {
            self.sent.lock().unwrap().clone()
        }

        #[must_use]
        pub fn close_reason(&self) -> Option<MessageCode> {
            self.closed.lock().unwrap().first().copied()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: &ServerMessage) -> Result<()> {
            if self.fail_sends || !self.closed.lock().unwrap().is_empty() {
                return Err(BridgeError::ChannelClosed);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&self, reason: MessageCode) {
            self.closed.lock().unwrap().push(reason);
        }
    }
}
