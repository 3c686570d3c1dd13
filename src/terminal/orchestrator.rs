//! Session Orchestrator
//!
//! Runs an adapter's input, output and wait operations as three tasks
//! sharing one cancellation token. Whichever finishes first cancels the
//! token and the others unwind. A supervisor task closes the client channel
//! only after the output task has returned, so buffered output is always
//! flushed before the close.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::ports::{MessageSink, MessageSource, ProtocolAdapter};

/// Drives one adapter until the session ends
#[derive(Debug)]
pub struct Orchestrator {
    id: Uuid,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session to completion.
    ///
    /// `on_close` runs once the output task is done, whatever ended the
    /// session. Returns after all three tasks and the close have completed.
    pub async fn run<F, Fut>(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        mut source: Box<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
        on_close: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.id;
        let shutdown = CancellationToken::new();
        let (flushed_tx, flushed_rx) = oneshot::channel::<()>();
        info!(session_id = %id, "Session started");

        let input = {
            let adapter = Arc::clone(&adapter);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _cancel_on_exit = shutdown.clone().drop_guard();
                adapter.input(source.as_mut(), &shutdown).await;
                debug!(session_id = %id, "Input task finished");
            })
        };

        let output = {
            let adapter = Arc::clone(&adapter);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _cancel_on_exit = shutdown.clone().drop_guard();
                adapter.output(sink.as_ref(), &shutdown).await;
                debug!(session_id = %id, "Output task finished");
                let _ = flushed_tx.send(());
            })
        };

        let wait = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _cancel_on_exit = shutdown.clone().drop_guard();
                adapter.wait(&shutdown).await;
                debug!(session_id = %id, "Wait task finished");
            })
        };

        // A dropped sender (output task panicked) also releases the close
        let supervisor = tokio::spawn(async move {
            let _ = flushed_rx.await;
            on_close().await;
        });

        for (name, task) in [("input", input), ("output", output), ("wait", wait)] {
            if let Err(e) = task.await {
                error!(session_id = %id, task = name, error = %e, "Session task failed");
            }
        }
        if let Err(e) = supervisor.await {
            error!(session_id = %id, error = %e, "Session close failed");
        }
        info!(session_id = %id, "Session ended");
    }
}
