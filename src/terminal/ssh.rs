//! SSH Protocol Adapter
//!
//! A pump task owns the shell channel: it appends everything the shell
//! writes (stdout and stderr) to the output buffer and applies the
//! keystrokes and resizes queued by the input task. The output task drains
//! the buffer on a short tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::OutputBuffer;
use super::protocol::{ClientMessage, ServerMessage};
use crate::error::Result;
use crate::ports::{
    Connection, HostFingerprint, MessageSink, MessageSource, ProtocolAdapter, SessionConnector,
};
use crate::ssh::{SshClient, SshConnector};

/// Longest the final flush waits for the pump to drain the channel
const FINAL_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
enum PumpCommand {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Close,
}

struct Transport {
    client: SshClient,
    connector: SshConnector,
}

/// Interactive shell session over SSH
pub struct SshAdapter {
    commands: mpsc::UnboundedSender<PumpCommand>,
    buffer: Arc<OutputBuffer>,
    exited: watch::Receiver<bool>,
    flush_interval: Duration,
    transport: Option<Transport>,
}

impl SshAdapter {
    /// Start pumping `channel`, a shell opened on `client`.
    #[must_use]
    pub fn spawn(
        client: SshClient,
        channel: Channel<Msg>,
        connector: SshConnector,
        flush_interval: Duration,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(OutputBuffer::new());
        let (exited_tx, exited) = watch::channel(false);

        tokio::spawn(pump(
            channel,
            rx,
            Arc::clone(&buffer),
            exited_tx,
            client.address().to_string(),
        ));

        Self {
            commands,
            buffer,
            exited,
            flush_interval,
            transport: Some(Transport { client, connector }),
        }
    }

    /// Close the shell and the connection. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.commands.send(PumpCommand::Close);
        if let Some(transport) = &self.transport {
            transport.connector.close(&transport.client).await;
        }
    }

    fn exited_flag(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>) {
    // A dropped sender means the pump is gone, which counts as exited
    let _ = exited.wait_for(|exited| *exited).await;
}

async fn pump(
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<PumpCommand>,
    buffer: Arc<OutputBuffer>,
    exited: watch::Sender<bool>,
    host: String,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => buffer.push(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => buffer.push(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(host = %host, exit_status, "Remote shell exit status");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(PumpCommand::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!(host = %host, error = %e, "Failed to write to shell");
                    }
                }
                Some(PumpCommand::Resize { cols, rows }) => {
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        warn!(host = %host, error = %e, "Failed to resize terminal");
                    }
                }
                Some(PumpCommand::Close) | None => {
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }
    let _ = exited.send(true);
}

#[async_trait]
impl ProtocolAdapter for SshAdapter {
    async fn input(&self, source: &mut dyn MessageSource, shutdown: &CancellationToken) {
        loop {
            let text = tokio::select! {
                () = shutdown.cancelled() => return,
                msg = source.recv() => match msg {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        debug!("Client went away");
                        return;
                    }
                    Err(e) => {
                        debug!(error = %e, "Client read failed");
                        return;
                    }
                },
            };

            let command = match ClientMessage::parse(&text) {
                Some(ClientMessage::Resize { cols, rows }) => PumpCommand::Resize { cols, rows },
                Some(ClientMessage::Command(cmd)) => PumpCommand::Data(cmd.into_bytes()),
                Some(ClientMessage::FingerprintConfirm { .. }) | None => {
                    debug!("Ignoring client message");
                    continue;
                }
            };
            if self.commands.send(command).is_err() {
                debug!("Shell channel gone, stopping input");
                return;
            }
        }
    }

    async fn output(&self, sink: &dyn MessageSink, shutdown: &CancellationToken) {
        let mut tick = tokio::time::interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if let Some(content) = self.buffer.take_valid() {
                        if let Err(e) = sink.send(&ServerMessage::data(content)).await {
                            debug!(error = %e, "Client channel closed, stopping output");
                            return;
                        }
                    }
                }
            }
        }

        if timeout(FINAL_DRAIN, wait_exited(self.exited_flag()))
            .await
            .is_err()
        {
            warn!("Shell did not close in time, flushing what was read");
        }
        if let Some(content) = self.buffer.take_all() {
            if let Err(e) = sink.send(&ServerMessage::data(content)).await {
                debug!(error = %e, "Final flush failed");
            }
        }
    }

    async fn wait(&self, shutdown: &CancellationToken) {
        tokio::select! {
            () = wait_exited(self.exited_flag()) => info!("Remote shell exited"),
            () = shutdown.cancelled() => {}
        }
        self.close().await;
    }
}

/// Opens interactive SSH shells for the session driver
#[derive(Debug, Clone)]
pub struct SshSessionConnector {
    connector: SshConnector,
    flush_interval: Duration,
}

impl SshSessionConnector {
    #[must_use]
    pub const fn new(connector: SshConnector, flush_interval: Duration) -> Self {
        Self {
            connector,
            flush_interval,
        }
    }
}

#[async_trait]
impl SessionConnector for SshSessionConnector {
    type Adapter = SshAdapter;

    async fn connect(&self) -> Result<Connection<Self::Adapter>> {
        let client = match self.connector.connect().await? {
            Connection::Established(client) => client,
            Connection::FingerprintRequired(fingerprint) => {
                return Ok(Connection::FingerprintRequired(fingerprint));
            }
        };

        match client.open_shell().await {
            Ok(channel) => Ok(Connection::Established(SshAdapter::spawn(
                client,
                channel,
                self.connector.clone(),
                self.flush_interval,
            ))),
            Err(e) => {
                error!(host = %client.address(), error = %e, "Failed to start shell");
                self.connector.close(&client).await;
                Err(e)
            }
        }
    }

    async fn add_fingerprint(&self, fingerprint: &HostFingerprint) -> Result<()> {
        self.connector.add_fingerprint(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::channel::mock::{RecordingSink, ScriptedSource};

    struct Harness {
        adapter: SshAdapter,
        commands: mpsc::UnboundedReceiver<PumpCommand>,
        exited: watch::Sender<bool>,
    }

    fn harness(flush_interval: Duration) -> Harness {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (exited, exited_rx) = watch::channel(false);
        Harness {
            adapter: SshAdapter {
                commands: commands_tx,
                buffer: Arc::new(OutputBuffer::new()),
                exited: exited_rx,
                flush_interval,
                transport: None,
            },
            commands,
            exited,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PumpCommand>) -> Vec<PumpCommand> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    // ============== Input ==============

    #[tokio::test]
    async fn test_input_forwards_keystrokes_and_resizes() {
        let mut h = harness(Duration::from_millis(10));
        let mut source = ScriptedSource::new(&[
            r#"{"type":"resize","cols":132,"rows":43}"#,
            r#"{"type":"cmd","cmd":"ls\r"}"#,
            "garbage",
            r#"{"type":"resize","cols":0,"rows":0}"#,
            r#"{"type":"fingerprint-confirm","accept":true}"#,
            r#"{"type":"cmd","cmd":"\u0003"}"#,
        ]);

        h.adapter.input(&mut source, &CancellationToken::new()).await;

        assert_eq!(
            drain(&mut h.commands),
            vec![
                PumpCommand::Resize {
                    cols: 132,
                    rows: 43
                },
                PumpCommand::Data(b"ls\r".to_vec()),
                PumpCommand::Data(vec![3]),
            ]
        );
    }

    #[tokio::test]
    async fn test_input_stops_on_shutdown() {
        let h = harness(Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        struct Pending;
        #[async_trait]
        impl MessageSource for Pending {
            async fn recv(&mut self) -> Result<Option<String>> {
                std::future::pending().await
            }
        }

        tokio::time::timeout(
            Duration::from_secs(1),
            h.adapter.input(&mut Pending, &shutdown),
        )
        .await
        .unwrap();
    }

    // ============== Output ==============

    #[tokio::test]
    async fn test_output_coalesces_and_flushes_on_shutdown() {
        let h = harness(Duration::from_millis(20));
        let sink = RecordingSink::new();
        let shutdown = CancellationToken::new();

        h.adapter.buffer.push(b"hello ");
        h.adapter.buffer.push(b"world");

        let output = h.adapter.output(&sink, &shutdown);
        let driver = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            h.adapter.buffer.push(b"\r\nbye");
            h.exited.send(true).unwrap();
            shutdown.cancel();
        };
        tokio::join!(output, driver);

        let text: String = sink
            .sent()
            .into_iter()
            .map(|m| match m {
                ServerMessage::Data { content } => content,
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(text, "hello world\r\nbye");
        assert_eq!(sink.sent()[0], ServerMessage::data("hello world"));
        assert!(h.adapter.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_output_stops_when_client_gone() {
        let h = harness(Duration::from_millis(5));
        let sink = RecordingSink::failing();
        h.adapter.buffer.push(b"lost");

        tokio::time::timeout(
            Duration::from_secs(1),
            h.adapter.output(&sink, &CancellationToken::new()),
        )
        .await
        .unwrap();
    }

    // ============== Wait ==============

    #[tokio::test]
    async fn test_wait_returns_on_exit_and_closes_pump() {
        let mut h = harness(Duration::from_millis(10));
        h.exited.send(true).unwrap();

        h.adapter.wait(&CancellationToken::new()).await;
        assert_eq!(drain(&mut h.commands), vec![PumpCommand::Close]);
    }

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let mut h = harness(Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        h.adapter.wait(&shutdown).await;
        h.adapter.wait(&shutdown).await;
        assert_eq!(
            drain(&mut h.commands),
            vec![PumpCommand::Close, PumpCommand::Close]
        );
    }
}
