//! Serial Protocol Adapter
//!
//! Same three operations over a local serial port (8N1). Reads run on a
//! blocking thread with a short port timeout so the loop notices shutdown.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, Parity, StopBits};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::OutputBuffer;
use super::protocol::{ClientMessage, ServerMessage};
use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};
use crate::ports::{
    Connection, HostFingerprint, MessageSink, MessageSource, ProtocolAdapter, SessionConnector,
};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 100;
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Terminal session over a serial port
pub struct SerialAdapter {
    name: String,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: SharedWriter,
}

impl std::fmt::Debug for SerialAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialAdapter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialAdapter {
    /// Open `name` at `baud_rate`, 8 data bits, no parity, one stop bit.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the port cannot be opened or duplicated.
    pub fn open(name: &str, baud_rate: u32) -> Result<Self> {
        let serial_error = |e: serialport::Error| BridgeError::Serial {
            port: name.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(serial_error)?;
        let writer = port.try_clone().map_err(serial_error)?;

        info!(port = %name, baud_rate, "Serial port opened");
        Ok(Self::from_io(name, port, writer))
    }

    /// Adapter over any byte stream pair.
    #[must_use]
    pub fn from_io(
        name: impl Into<String>,
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the port. Safe to call more than once.
    pub fn close(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if reader.is_some() || writer.is_some() {
            debug!(port = %self.name, "Serial port closed");
        }
    }

    async fn write(&self, bytes: Vec<u8>) -> std::io::Result<()> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(port) => {
                    port.write_all(&bytes)?;
                    port.flush()
                }
                None => Err(std::io::Error::new(ErrorKind::NotConnected, "port closed")),
            }
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

/// Blocking read loop; stops on shutdown, a read error or a closed receiver.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    chunks: &mpsc::UnboundedSender<Vec<u8>>,
    shutdown: &CancellationToken,
    name: &str,
) {
    let mut buf = [0u8; READ_CHUNK];
    while !shutdown.is_cancelled() {
        match reader.read(&mut buf) {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF),
            Ok(n) => {
                if chunks.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!(port = %name, error = %e, "Serial read failed");
                return;
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for SerialAdapter {
    async fn input(&self, source: &mut dyn MessageSource, shutdown: &CancellationToken) {
        loop {
            let text = tokio::select! {
                () = shutdown.cancelled() => return,
                msg = source.recv() => match msg {
                    Ok(Some(text)) => text,
                    Ok(None) => return,
                    Err(e) => {
                        debug!(error = %e, "Client read failed");
                        return;
                    }
                },
            };

            if let Some(ClientMessage::Command(cmd)) = ClientMessage::parse(&text) {
                if let Err(e) = self.write(cmd.into_bytes()).await {
                    warn!(port = %self.name, error = %e, "Serial write failed");
                    return;
                }
            }
        }
    }

    async fn output(&self, sink: &dyn MessageSink, shutdown: &CancellationToken) {
        let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reading = {
            let shutdown = shutdown.clone();
            let name = self.name.clone();
            tokio::task::spawn_blocking(move || read_loop(reader, &tx, &shutdown, &name))
        };

        let buffer = OutputBuffer::new();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => {
                        buffer.push(&chunk);
                        if let Some(content) = buffer.take_valid() {
                            if let Err(e) = sink.send(&ServerMessage::data(content)).await {
                                debug!(error = %e, "Client channel closed, stopping output");
                                return;
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        // The reader notices shutdown within one port timeout
        let _ = reading.await;
        while let Ok(chunk) = rx.try_recv() {
            buffer.push(&chunk);
        }
        if let Some(content) = buffer.take_all() {
            let _ = sink.send(&ServerMessage::data(content)).await;
        }
    }

    async fn wait(&self, shutdown: &CancellationToken) {
        shutdown.cancelled().await;
        self.close();
    }
}

/// Opens a configured serial port for the session driver
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for SerialConnector {
    type Adapter = SerialAdapter;

    async fn connect(&self) -> Result<Connection<Self::Adapter>> {
        let config = self.config.clone();
        let port = config.port.clone();
        tokio::task::spawn_blocking(move || SerialAdapter::open(&config.port, config.baud_rate))
            .await
            .map_err(|e| BridgeError::Serial {
                port,
                reason: e.to_string(),
            })?
            .map(Connection::Established)
    }

    async fn add_fingerprint(&self, _fingerprint: &HostFingerprint) -> Result<()> {
        Ok(())
    }
}

/// Names of the serial ports present on this machine.
///
/// # Errors
///
/// Returns `Serial` if the ports cannot be enumerated.
pub fn list_ports() -> Result<Vec<String>> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| BridgeError::Serial {
            port: "*".to_string(),
            reason: format!("failed to list serial ports: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::channel::mock::{RecordingSink, ScriptedSource};
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBytes(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBytes {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[tokio::test]
    async fn test_input_writes_commands_only() {
        let written = SharedBytes::default();
        let adapter = SerialAdapter::from_io("ttyTEST", Cursor::new(Vec::new()), written.clone());
        let mut source = ScriptedSource::new(&[
            r#"{"type":"cmd","cmd":"AT\r"}"#,
            r#"{"type":"resize","cols":80,"rows":24}"#,
            r#"{"type":"cmd","cmd":"ATI\r"}"#,
        ]);

        adapter.input(&mut source, &CancellationToken::new()).await;
        assert_eq!(*written.0.lock().unwrap(), b"AT\rATI\r");
    }

    #[tokio::test]
    async fn test_output_forwards_reads() {
        let adapter = SerialAdapter::from_io(
            "ttyTEST",
            Cursor::new(b"U-Boot 2024.01\r\n".to_vec()),
            SharedBytes::default(),
        );
        let sink = RecordingSink::new();
        let shutdown = CancellationToken::new();

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        };
        tokio::join!(adapter.output(&sink, &shutdown), stopper);

        let text: String = sink
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Data { content } => Some(content),
                _ => None,
            })
            .collect();
        assert_eq!(text, "U-Boot 2024.01\r\n");
    }

    #[tokio::test]
    async fn test_read_error_ends_output() {
        let adapter = SerialAdapter::from_io("ttyTEST", FailingReader, SharedBytes::default());
        let sink = RecordingSink::new();
        tokio::time::timeout(
            Duration::from_secs(1),
            adapter.output(&sink, &CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wait_closes_port() {
        let written = SharedBytes::default();
        let adapter = SerialAdapter::from_io("ttyTEST", Cursor::new(Vec::new()), written);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        adapter.wait(&shutdown).await;
        adapter.close();

        assert!(adapter.write(b"late".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = SerialConnector::new(SerialConfig {
            port: "/dev/termbridge-no-such-port".to_string(),
            baud_rate: 9600,
        })
        .connect()
        .await;
        assert!(matches!(result, Err(BridgeError::Serial { .. })));
    }
}
