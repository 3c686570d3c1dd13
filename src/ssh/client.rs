use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use russh::client::{self, Config, Handle, Handler, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PrivateKey, PublicKey, decode_secret_key};
use russh::{Channel, Pty};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::known_hosts::{self, HostTrustStore, VerifyResult};
use super::params::{AuthMethod, ConnectionParams, preferred_algorithms};
use crate::error::{BridgeError, Result};
use crate::ports::{Connection, HostFingerprint};

/// Terminal geometry requested with the PTY, until the client sends a resize.
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_ROWS: u32 = 24;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_INTERACTIVE_ROUNDS: usize = 5;

/// Sanitize SSH error messages to prevent credential leakage.
/// Masks authentication method names and truncates long messages.
pub(crate) fn sanitize_ssh_error(error: &impl std::fmt::Display) -> String {
    let mut msg = error.to_string();
    for method in &["publickey", "keyboard-interactive", "gssapi-with-mic"] {
        msg = msg.replace(method, "***");
    }
    if msg.len() > 500 {
        let mut end = 500;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &msg[..end])
    } else {
        msg
    }
}

/// How the client handler treats the server's host key.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Check against the trust store; unknown and changed keys abort the dial
    Verify(HostTrustStore),
    /// Accept any key without looking at the trust store
    TrustAll,
    /// Accept any key, only recording it
    Capture,
}

#[derive(Debug, Clone)]
enum KeyCheck {
    Trusted,
    Unknown,
    Changed { line: usize },
    Failed(String),
}

#[derive(Debug)]
struct Observed {
    key: PublicKey,
    check: KeyCheck,
}

type ObservedSlot = Arc<Mutex<Option<Observed>>>;

/// russh handler recording the host key it was shown and the verdict.
struct ClientHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
    observed: ObservedSlot,
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check = match &self.policy {
            HostKeyPolicy::TrustAll | HostKeyPolicy::Capture => KeyCheck::Trusted,
            HostKeyPolicy::Verify(store) => {
                match store.verify(&self.hostname, self.port, server_public_key) {
                    Ok(VerifyResult::Match) => KeyCheck::Trusted,
                    Ok(VerifyResult::Unknown) => KeyCheck::Unknown,
                    Ok(VerifyResult::Mismatch { line }) => KeyCheck::Changed { line },
                    Err(e) => KeyCheck::Failed(e.to_string()),
                }
            }
        };
        let accepted = matches!(check, KeyCheck::Trusted);
        *self
            .observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Observed {
            key: server_public_key.clone(),
            check,
        });
        Ok(accepted)
    }
}

/// Credentials ready to present, parsed before dialing.
enum Credentials<'a> {
    Password(&'a str),
    Key(PrivateKey),
}

impl<'a> Credentials<'a> {
    fn resolve(params: &'a ConnectionParams) -> Result<Self> {
        match &params.auth {
            AuthMethod::Password(password) => Ok(Self::Password(password.as_str())),
            AuthMethod::PrivateKey { pem, passphrase } => {
                decode_secret_key(pem, passphrase.as_ref().map(|p| p.as_str()))
                    .map(Self::Key)
                    .map_err(|e| BridgeError::AuthConfig {
                        user: params.user.clone(),
                        reason: format!("cannot parse private key: {}", sanitize_ssh_error(&e)),
                    })
            }
        }
    }
}

/// Authenticated SSH transport
pub struct SshClient {
    handle: Handle<ClientHandler>,
    address: String,
    command_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SshClient {
    /// Dial, verify the host key and authenticate.
    ///
    /// An unknown host is not an error: a throwaway connection captures the
    /// presented key and its fingerprint is returned as
    /// `Connection::FingerprintRequired` for the caller to confirm.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The private key cannot be parsed (`AuthConfig`)
    /// - The host key differs from the stored one (`HostKeyChanged`)
    /// - The connection cannot be established or times out
    /// - Authentication fails
    pub async fn connect(params: &ConnectionParams, policy: HostKeyPolicy) -> Result<Connection<Self>> {
        let address = params.address();
        let credentials = Credentials::resolve(params)?;

        let known = match &policy {
            HostKeyPolicy::Verify(store) => store.known_algorithms(&params.host, params.port),
            HostKeyPolicy::TrustAll => {
                warn!(host = %address, "Host key verification disabled, accepting any host key");
                Vec::new()
            }
            HostKeyPolicy::Capture => Vec::new(),
        };

        let observed = ObservedSlot::default();
        let handle = match dial(params, policy, &known, Arc::clone(&observed)).await {
            Ok(handle) => handle,
            Err(e) => {
                let seen = observed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                return match seen.map(|o| o.check) {
                    Some(KeyCheck::Unknown) => {
                        info!(host = %address, "Unknown host, fingerprint confirmation required");
                        let key = probe_host_key(params).await?;
                        Ok(Connection::FingerprintRequired(HostFingerprint {
                            host: address,
                            fingerprint: known_hosts::fingerprint(&key),
                        }))
                    }
                    Some(KeyCheck::Changed { line }) => {
                        error!(
                            host = %address,
                            line = %line,
                            "Host key changed, refusing to connect"
                        );
                        Err(BridgeError::HostKeyChanged {
                            host: address,
                            line,
                        })
                    }
                    Some(KeyCheck::Failed(reason)) => Err(BridgeError::KnownHosts { reason }),
                    Some(KeyCheck::Trusted) | None => Err(e),
                };
            }
        };

        Self::authenticate(handle, params, credentials)
            .await
            .map(Connection::Established)
    }

    async fn authenticate(
        mut handle: Handle<ClientHandler>,
        params: &ConnectionParams,
        credentials: Credentials<'_>,
    ) -> Result<Self> {
        let address = params.address();
        let (method, accepted) = match credentials {
            Credentials::Password(password) => (
                "password",
                auth_with_password(&mut handle, params, password).await,
            ),
            Credentials::Key(key) => ("key", auth_with_key(&mut handle, params, key).await),
        };

        let accepted = accepted.map_err(|e| {
            error!(
                host = %address,
                user = %params.user,
                method = method,
                error = %sanitize_ssh_error(&e),
                "SSH authentication error"
            );
            BridgeError::SshAuth {
                user: params.user.clone(),
                host: address.clone(),
            }
        })?;

        let client = Self {
            handle,
            address,
            command_timeout: params.command_timeout,
            closed: AtomicBool::new(false),
        };

        if !accepted {
            error!(
                host = %client.address,
                user = %params.user,
                method = method,
                "SSH authentication failed"
            );
            client.close().await;
            return Err(BridgeError::SshAuth {
                user: params.user.clone(),
                host: client.address.clone(),
            });
        }

        info!(host = %client.address, user = %params.user, method = method, "SSH connection established");
        Ok(client)
    }

    /// `host:port` of this connection
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Default timeout for remote commands run on this connection
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Whether the transport is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.handle.is_closed()
    }

    /// Open a session channel with an `xterm` PTY and start a shell.
    ///
    /// # Errors
    ///
    /// Returns `SshChannel` if the channel cannot be opened or the server
    /// rejects the PTY or shell request.
    pub async fn open_shell(&self) -> Result<Channel<Msg>> {
        let channel = self.open_session("shell").await?;

        channel
            .request_pty(
                true,
                "xterm",
                DEFAULT_COLS,
                DEFAULT_ROWS,
                0,
                0,
                &[
                    (Pty::ECHO, 1),
                    (Pty::TTY_OP_ISPEED, 14400),
                    (Pty::TTY_OP_OSPEED, 14400),
                ],
            )
            .await
            .map_err(|e| BridgeError::SshChannel {
                reason: format!("PTY request failed: {e}"),
            })?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| BridgeError::SshChannel {
                reason: format!("shell request failed: {e}"),
            })?;

        debug!(host = %self.address, "Interactive shell started");
        Ok(channel)
    }

    /// Open a session channel running `command`.
    pub(crate) async fn open_exec(&self, command: &str) -> Result<Channel<Msg>> {
        let channel = self.open_session("exec").await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| BridgeError::SshChannel {
                reason: format!("exec request failed: {e}"),
            })?;
        Ok(channel)
    }

    async fn open_session(&self, purpose: &str) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::SshChannel {
                reason: format!("failed to open {purpose} channel: {e}"),
            })
    }

    /// Start the SFTP subsystem on a new channel.
    ///
    /// # Errors
    ///
    /// Returns `Sftp` if the channel, the subsystem request or the SFTP
    /// handshake fails.
    pub async fn sftp_session(&self) -> Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| BridgeError::Sftp {
                reason: format!("failed to open channel: {e}"),
            })?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| BridgeError::Sftp {
                reason: format!("failed to request SFTP subsystem: {e}"),
            })?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| BridgeError::Sftp {
                reason: format!("failed to initialize SFTP session: {e}"),
            })
    }

    /// Disconnect. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match timeout(
            DISCONNECT_TIMEOUT,
            self.handle
                .disconnect(russh::Disconnect::ByApplication, "", "en"),
        )
        .await
        {
            Ok(Ok(())) => debug!(host = %self.address, "SSH connection closed"),
            Ok(Err(e)) => debug!(host = %self.address, error = %e, "SSH disconnect failed, connection already gone"),
            Err(_) => warn!(host = %self.address, "Timeout closing SSH connection, forcing drop"),
        }
    }
}

/// Connect only far enough to see the server's host key, then disconnect.
///
/// # Errors
///
/// Returns an error if the server could not be reached before presenting a
/// key.
pub async fn probe_host_key(params: &ConnectionParams) -> Result<PublicKey> {
    let observed = ObservedSlot::default();
    let dialed = dial(params, HostKeyPolicy::Capture, &[], Arc::clone(&observed)).await;
    let key = observed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .map(|o| o.key);

    match dialed {
        Ok(handle) => {
            let _ = timeout(
                DISCONNECT_TIMEOUT,
                handle.disconnect(russh::Disconnect::ByApplication, "", "en"),
            )
            .await;
        }
        Err(e) if key.is_none() => return Err(e),
        Err(_) => {}
    }

    key.ok_or_else(|| BridgeError::SshConnection {
        host: params.address(),
        reason: "server did not present a host key".to_string(),
    })
}

/// Re-derive the host key and append it to the trust store, provided its
/// fingerprint is still the one the user confirmed.
///
/// # Errors
///
/// Returns `FingerprintMismatch` if the server now presents a different key,
/// or the store's error if the entry cannot be written.
pub async fn add_fingerprint(
    params: &ConnectionParams,
    store: &HostTrustStore,
    confirmed: &HostFingerprint,
) -> Result<()> {
    let address = params.address();
    if confirmed.host != address {
        return Err(BridgeError::KnownHosts {
            reason: format!(
                "fingerprint for {} cannot be trusted for {address}",
                confirmed.host
            ),
        });
    }

    let key = probe_host_key(params).await?;
    let actual = known_hosts::fingerprint(&key);
    if actual != confirmed.fingerprint {
        error!(
            host = %address,
            expected = %confirmed.fingerprint,
            actual = %actual,
            "Host key changed between prompt and confirmation"
        );
        return Err(BridgeError::FingerprintMismatch {
            host: address,
            expected: confirmed.fingerprint.clone(),
            actual,
        });
    }

    store.append(&params.host, params.port, &key)
}

async fn dial(
    params: &ConnectionParams,
    policy: HostKeyPolicy,
    known: &[russh::keys::ssh_key::Algorithm],
    observed: ObservedSlot,
) -> Result<Handle<ClientHandler>> {
    let config = Arc::new(Config {
        inactivity_timeout: None,
        keepalive_interval: (!params.keepalive.is_zero()).then_some(params.keepalive),
        keepalive_max: 3,
        preferred: preferred_algorithms(params, known),
        ..Default::default()
    });

    let handler = ClientHandler {
        hostname: params.host.clone(),
        port: params.port,
        policy,
        observed,
    };

    let address = params.address();
    let seconds = params.timeout.as_secs();

    timeout(
        params.timeout,
        client::connect(config, (params.host.as_str(), params.port), handler),
    )
    .await
    .map_err(|_| {
        error!(host = %address, timeout_secs = seconds, "SSH connection timeout");
        BridgeError::SshTimeout {
            host: address.clone(),
            seconds,
        }
    })?
    .map_err(|e| {
        let reason = sanitize_ssh_error(&e);
        debug!(host = %address, error = %reason, "SSH dial failed");
        BridgeError::SshConnection {
            host: address.clone(),
            reason,
        }
    })
}

/// Password first, then keyboard-interactive answering a single prompt with
/// the same password.
async fn auth_with_password(
    handle: &mut Handle<ClientHandler>,
    params: &ConnectionParams,
    password: &str,
) -> std::result::Result<bool, russh::Error> {
    if handle
        .authenticate_password(&params.user, password)
        .await?
        .success()
    {
        return Ok(true);
    }

    debug!(user = %params.user, "Password rejected, trying keyboard-interactive");
    let mut response = handle
        .authenticate_keyboard_interactive_start(&params.user, None::<String>)
        .await?;

    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers: Vec<String> = if prompts.len() == 1 {
                    vec![password.to_string()]
                } else {
                    vec![String::new(); prompts.len()]
                };
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await?;
            }
            _ => return Ok(false),
        }
    }
    Ok(false)
}

async fn auth_with_key(
    handle: &mut Handle<ClientHandler>,
    params: &ConnectionParams,
    key: PrivateKey,
) -> std::result::Result<bool, russh::Error> {
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();

    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
    Ok(handle
        .authenticate_publickey(&params.user, key_with_hash)
        .await?
        .success())
}
