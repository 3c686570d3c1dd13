//! Host Trust Record backed by an OpenSSH `known_hosts` file
//!
//! Verification and appends go through russh's `known_hosts` support, so
//! entries are written as `host key-type base64` (or `[host]:port ...` for
//! non-standard ports) and can be read by OpenSSH.

use std::path::{Path, PathBuf};

use russh::keys::known_hosts::{
    check_known_hosts_path, known_host_keys_path, learn_known_hosts_path,
};
use russh::keys::ssh_key::Algorithm;
use russh::keys::{Error as KeyError, HashAlg, PublicKey};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};

use crate::config::KnownHostsConfig;
use crate::error::{BridgeError, Result};

/// Result of verifying a host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// Key matches a known entry
    Match,
    /// Host is known under a different key (line number of the entry)
    Mismatch { line: usize },
    /// Host is not in `known_hosts`
    Unknown,
}

/// Append-only store of trusted host keys.
#[derive(Debug, Clone)]
pub struct HostTrustStore {
    path: PathBuf,
}

impl HostTrustStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn from_config(config: &KnownHostsConfig) -> Self {
        Self::new(shellexpand::tilde(&config.path).into_owned())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify a host key against the store
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn verify(&self, hostname: &str, port: u16, key: &PublicKey) -> Result<VerifyResult> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "known_hosts file does not exist yet");
            return Ok(VerifyResult::Unknown);
        }
        self.check_permissions();

        match check_known_hosts_path(hostname, port, key, &self.path) {
            Ok(true) => {
                debug!(hostname = %hostname, port = %port, "Host key verified");
                Ok(VerifyResult::Match)
            }
            Ok(false) => {
                debug!(hostname = %hostname, port = %port, "Host key not in known_hosts");
                Ok(VerifyResult::Unknown)
            }
            Err(KeyError::KeyChanged { line }) => {
                warn!(
                    hostname = %hostname,
                    port = %port,
                    line = %line,
                    "Host key mismatch detected"
                );
                Ok(VerifyResult::Mismatch { line })
            }
            Err(e) => Err(BridgeError::KnownHosts {
                reason: format!("failed to check {}: {e}", self.path.display()),
            }),
        }
    }

    /// Algorithms of the keys already stored for this host, in file order.
    #[must_use]
    pub fn known_algorithms(&self, hostname: &str, port: u16) -> Vec<Algorithm> {
        if !self.path.exists() {
            return Vec::new();
        }
        match known_host_keys_path(hostname, port, &self.path) {
            Ok(keys) => {
                let mut algorithms: Vec<Algorithm> = Vec::new();
                for (_, key) in keys {
                    let algorithm = key.algorithm();
                    if !algorithms.contains(&algorithm) {
                        algorithms.push(algorithm);
                    }
                }
                algorithms
            }
            Err(e) => {
                warn!(hostname = %hostname, error = %e, "Failed to read stored host keys");
                Vec::new()
            }
        }
    }

    /// Append a host key.
    ///
    /// The file and its directory are created with owner-only permissions
    /// when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be created or
    /// written to.
    pub fn append(&self, hostname: &str, port: u16, key: &PublicKey) -> Result<()> {
        self.ensure_file()?;
        learn_known_hosts_path(hostname, port, key, &self.path).map_err(|e| {
            BridgeError::KnownHosts {
                reason: format!("failed to append to {}: {e}", self.path.display()),
            }
        })?;

        info!(
            hostname = %hostname,
            port = %port,
            fingerprint = %fingerprint(key),
            "Added host key to known_hosts"
        );
        Ok(())
    }

    fn ensure_file(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| BridgeError::KnownHosts {
                    reason: format!("failed to create {}: {e}", dir.display()),
                })?;
                #[cfg(unix)]
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        if !self.path.exists() {
            let mut options = std::fs::OpenOptions::new();
            options.create(true).append(true);
            #[cfg(unix)]
            options.mode(0o600);
            options.open(&self.path).map_err(|e| BridgeError::KnownHosts {
                reason: format!("failed to create {}: {e}", self.path.display()),
            })?;
        }
        Ok(())
    }

    /// Warn if the file is writable by group or others (Unix only).
    #[cfg(unix)]
    fn check_permissions(&self) {
        if let Ok(metadata) = std::fs::metadata(&self.path) {
            let mode = metadata.mode() & 0o777;
            if mode & 0o022 != 0 {
                warn!(
                    path = %self.path.display(),
                    mode = format!("{mode:o}"),
                    "known_hosts file is writable by other users. \
                     Consider running: chmod 600 {}",
                    self.path.display()
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn check_permissions(&self) {}
}

/// SHA-256 fingerprint of a public key, `SHA256:<base64>`
#[must_use]
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// Split `host:port` (or `[v6]:port`), falling back to `default_port`.
#[must_use]
pub fn split_host_port(address: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), default_port),
        },
        _ => (address.to_string(), default_port),
    }
}

/// `host:port` as shown to the user and stored in fingerprint prompts.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
