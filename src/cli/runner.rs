//! CLI runner functions
//!
//! These functions execute CLI commands on top of the library: the session
//! driver for interactive commands, the SFTP handler for file commands.

use std::fmt::Write as FmtWrite;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::classify::MessageCode;
use crate::config::Config;
use crate::crypto::CredentialCipher;
use crate::error::{BridgeError, Result};
use crate::metadata::HostMetadata;
use crate::ports::{Connection, HostFingerprint, MessageSink, SessionConnector};
use crate::sftp::{SftpHandler, TransferProgress};
use crate::ssh::SshConnector;
use crate::terminal::{
    DEFAULT_READ_LIMIT, Frame, SerialConnector, SshSessionConnector, duplex, list_ports, serve,
};

/// One outbound frame as a JSON line (without the newline).
///
/// # Errors
///
/// Returns `Json` if the frame cannot be serialized.
pub fn frame_to_json(frame: &Frame) -> Result<String> {
    match frame {
        Frame::Message(message) => Ok(message.to_json()?),
        Frame::Close(code) => Ok(serde_json::to_string(&json!({
            "type": "close",
            "code": code,
            "message": code.text(),
        }))?),
    }
}

/// Bridge the session driver to stdin/stdout until the session closes.
async fn bridge_stdio<C: SessionConnector>(connector: &C) -> MessageCode {
    let (source, sink, client) = duplex(DEFAULT_READ_LIMIT);
    let (tx, mut rx) = client.split();

    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });

    let stdout_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            let line = match frame_to_json(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable frame");
                    continue;
                }
            };
            if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
            if matches!(frame, Frame::Close(_)) {
                break;
            }
        }
    });

    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let code = serve(connector, Box::new(source), sink).await;

    if let Err(e) = stdout_task.await {
        warn!(error = %e, "stdout writer failed");
    }
    stdin_task.abort();
    code
}

/// Run an interactive SSH session
///
/// # Errors
///
/// Returns an error if the host is not configured or its credentials cannot
/// be resolved. Connection failures are reported on stdout as protocol
/// messages instead.
pub async fn run_session(config: &Config, host: &str) -> Result<MessageCode> {
    let cipher = CredentialCipher::system();
    let connector = SshConnector::from_config(config, host, &cipher)?;
    info!(host = %host, address = %connector.params().address(), "Starting SSH session");

    let connector = SshSessionConnector::new(connector, config.terminal.flush_interval());
    let code = bridge_stdio(&connector).await;
    info!(host = %host, reason = %code, "SSH session finished");
    Ok(code)
}

/// Run an interactive serial session
///
/// # Errors
///
/// Returns `Serial` if no port is configured under `name`.
pub async fn run_serial_session(config: &Config, name: &str) -> Result<MessageCode> {
    let serial = config
        .serial
        .get(name)
        .ok_or_else(|| BridgeError::Serial {
            port: name.to_string(),
            reason: "no such serial port in configuration".to_string(),
        })?;
    info!(port = %serial.port, baud_rate = serial.baud_rate, "Starting serial session");

    let code = bridge_stdio(&SerialConnector::new(serial.clone())).await;
    info!(port = %serial.port, reason = %code, "Serial session finished");
    Ok(code)
}

/// Print the serial ports present on this machine
///
/// # Errors
///
/// Returns `Serial` if the ports cannot be enumerated.
pub fn run_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn open_sftp(config: &Config, host: &str) -> Result<SftpHandler> {
    let cipher = CredentialCipher::system();
    let mut handler = SftpHandler::new(SshConnector::from_config(config, host, &cipher)?);
    handler.connect().await?;
    Ok(handler)
}

fn progress_printer(enabled: bool) -> impl FnMut(u64, u64) {
    move |done, total| {
        if enabled {
            let progress = TransferProgress {
                bytes_transferred: done,
                total_bytes: total,
            };
            eprint!(
                "\r  Progress: {:.1}% ({done} / {total} bytes)",
                progress.percentage()
            );
            let _ = std::io::stderr().flush();
        }
    }
}

/// List a remote directory
///
/// # Errors
///
/// Returns an error if the host is unknown, the connection fails or the
/// directory cannot be read.
pub async fn run_ls(config: &Config, host: &str, path: &str) -> Result<()> {
    let mut handler = open_sftp(config, host).await?;
    let result = handler.list_remote_files(path).await;
    let resolved = handler.process_path(path);
    handler.close().await;

    let mut files = result?;
    files.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

    let mut output = String::new();
    if let Ok(resolved) = resolved {
        let _ = writeln!(output, "{resolved}:");
    }
    for file in &files {
        let _ = writeln!(
            output,
            "{} {:<8} {:<8} {:>12} {} {}",
            file.permissions, file.owner, file.group, file.size, file.mod_time, file.name
        );
    }
    let _ = write!(output, "Total: {} entries", files.len());
    println!("{output}");
    Ok(())
}

/// Upload a file to a remote host via SFTP
///
/// # Errors
///
/// Returns an error if:
/// - The specified host is not found in the configuration
/// - The local path is a directory or cannot be read
/// - SSH/SFTP connection fails
/// - The file transfer fails (permissions, disk space, network)
pub async fn run_upload(
    config: &Config,
    host: &str,
    local_path: &Path,
    remote_path: &str,
    show_progress: bool,
) -> Result<()> {
    let expanded = shellexpand::tilde(&local_path.to_string_lossy()).into_owned();
    let local_path = Path::new(&expanded);

    let mut handler = open_sftp(config, host).await?;
    let result = handler
        .upload_file(local_path, remote_path, progress_printer(show_progress))
        .await;
    handler.close().await;
    if show_progress {
        eprintln!();
    }

    let bytes = result?;
    println!(
        "File uploaded successfully:\n  Host: {host}\n  Local: {}\n  Remote: {remote_path}\n  Size: {bytes} bytes",
        local_path.display()
    );
    Ok(())
}

/// Download a file from a remote host via SFTP
///
/// # Errors
///
/// Returns an error if:
/// - The specified host is not found in the configuration
/// - The remote path is a directory or cannot be read
/// - The local destination cannot be created
/// - SSH/SFTP connection fails
pub async fn run_download(
    config: &Config,
    host: &str,
    remote_path: &str,
    local_path: &Path,
    show_progress: bool,
) -> Result<()> {
    let expanded = shellexpand::tilde(&local_path.to_string_lossy()).into_owned();
    let local_path = Path::new(&expanded);

    let mut handler = open_sftp(config, host).await?;
    let result = handler
        .download_file(remote_path, local_path, progress_printer(show_progress))
        .await;
    handler.close().await;
    if show_progress {
        eprintln!();
    }

    let bytes = result?;
    println!(
        "File downloaded successfully:\n  Host: {host}\n  Remote: {remote_path}\n  Local: {}\n  Size: {bytes} bytes",
        local_path.display()
    );
    Ok(())
}

/// Create a remote directory
///
/// # Errors
///
/// Returns an error if the connection fails or a component cannot be
/// created.
pub async fn run_mkdir(config: &Config, host: &str, path: &str) -> Result<()> {
    let mut handler = open_sftp(config, host).await?;
    let result = handler.create_remote_folder(path).await;
    handler.close().await;
    result?;
    println!("Created {path}");
    Ok(())
}

/// Print the size of a remote file
///
/// # Errors
///
/// Returns an error if the connection fails or the file cannot be
/// inspected.
pub async fn run_stat(config: &Config, host: &str, path: &str) -> Result<()> {
    let mut handler = open_sftp(config, host).await?;
    let result = handler.get_remote_file_size(path).await;
    handler.close().await;
    println!("{path}: {} bytes", result?);
    Ok(())
}

/// Print host metadata as JSON
///
/// # Errors
///
/// Returns an error if the connection fails or the host key is not yet
/// trusted.
pub async fn run_info(config: &Config, host: &str) -> Result<()> {
    let cipher = CredentialCipher::system();
    let connector = SshConnector::from_config(config, host, &cipher)?;

    let client = match connector.connect().await? {
        Connection::Established(client) => client,
        Connection::FingerprintRequired(fingerprint) => {
            return Err(BridgeError::KnownHosts {
                reason: format!(
                    "{} is not trusted yet (fingerprint {}); run `termbridge trust {host} {}` first",
                    fingerprint.host, fingerprint.fingerprint, fingerprint.fingerprint
                ),
            });
        }
    };

    let metadata = HostMetadata::fetch(&client).await;
    connector.close(&client).await;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

/// Trust a host key after checking it matches `fingerprint`
///
/// # Errors
///
/// Returns `FingerprintMismatch` if the host presents another key, or the
/// error from writing the trust file.
pub async fn run_trust(config: &Config, host: &str, fingerprint: &str) -> Result<()> {
    let cipher = CredentialCipher::system();
    let connector = SshConnector::from_config(config, host, &cipher)?;
    let confirmed = HostFingerprint {
        host: connector.params().address(),
        fingerprint: fingerprint.to_string(),
    };

    connector.add_fingerprint(&confirmed).await?;
    println!(
        "Trusted {} ({fingerprint}) in {}",
        confirmed.host,
        connector.store().path().display()
    );
    Ok(())
}

/// Seal a secret read from stdin and print it as `{ciphertext, salt}` JSON
///
/// # Errors
///
/// Returns `Crypto` if the machine key is unavailable, or `Io` if stdin
/// cannot be read.
pub async fn run_encrypt() -> Result<()> {
    let mut input = zeroize::Zeroizing::new(String::new());
    tokio::io::stdin().read_to_string(&mut *input).await?;
    let secret = input.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        return Err(BridgeError::Crypto {
            reason: "nothing to encrypt on stdin".to_string(),
        });
    }

    let field = CredentialCipher::system().encrypt(secret)?;
    println!("{}", serde_json::to_string(&field)?);
    Ok(())
}
