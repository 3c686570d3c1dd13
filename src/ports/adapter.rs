//! Protocol Adapter Port
//!
//! One adapter owns one transport (an SSH shell channel or a serial port)
//! and exposes the three operations the session orchestrator runs
//! concurrently. All three observe the shared shutdown token.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::channel::{MessageSink, MessageSource};

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Read client messages and forward them into the transport until the
    /// client side closes, a read fails, or shutdown is signalled.
    async fn input(&self, source: &mut dyn MessageSource, shutdown: &CancellationToken);

    /// Forward transport output to the client until shutdown is signalled
    /// or the transport stops producing output. Everything read from the
    /// transport must reach the sink before this returns.
    async fn output(&self, sink: &dyn MessageSink, shutdown: &CancellationToken);

    /// Block until the remote process exits or shutdown is signalled, then
    /// close the transport.
    async fn wait(&self, shutdown: &CancellationToken);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::terminal::ServerMessage;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Adapter that emits a fixed list of chunks, then reports process exit.
    pub struct ScriptedAdapter {
        chunks: Mutex<Vec<String>>,
        exit_after: Duration,
        pub inputs: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        #[must_use]
        pub fn new(chunks: &[&str], exit_after: Duration) -> Self {
            Self {
                chunks: Mutex::new(chunks.iter().map(ToString::to_string).collect()),
                exit_after,
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProtocolAdapter for ScriptedAdapter {
        async fn input(&self, source: &mut dyn MessageSource, shutdown: &CancellationToken) {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    msg = source.recv() => match msg {
                        Ok(Some(text)) => self.inputs.lock().unwrap().push(text),
                        _ => return,
                    },
                }
            }
        }

        async fn output(&self, sink: &dyn MessageSink, shutdown: &CancellationToken) {
            shutdown.cancelled().await;
            let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
            for chunk in chunks {
                let _ = sink.send(&ServerMessage::data(chunk)).await;
            }
        }

        async fn wait(&self, shutdown: &CancellationToken) {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(self.exit_after) => {}
            }
        }
    }
}
