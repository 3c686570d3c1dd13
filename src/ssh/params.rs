//! Connection parameters for one SSH connection attempt

use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;

use russh::keys::ssh_key::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, kex, mac};
use tracing::warn;
use zeroize::Zeroizing;

use crate::config::{AlgorithmConfig, AuthConfig, HostConfig, LimitsConfig, SecretValue};
use crate::crypto::CredentialCipher;
use crate::error::{BridgeError, Result};

/// Resolved authentication method with plaintext secrets.
#[derive(Clone)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PrivateKey {
        pem: Zeroizing<String>,
        passphrase: Option<Zeroizing<String>>,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("passphrase", &passphrase.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to dial and authenticate one host.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: AuthMethod,
    pub trust_unknown_host: bool,
    pub timeout: Duration,
    pub keepalive: Duration,
    pub command_timeout: Duration,
    pub algorithms: AlgorithmConfig,
}

impl ConnectionParams {
    /// Build parameters from a host entry, decrypting sealed secrets and
    /// reading key files.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if a sealed secret cannot be decrypted
    /// and `BridgeError::AuthConfig` if a key file cannot be read or the
    /// resolved secret is empty.
    pub fn from_host(
        host: &HostConfig,
        limits: &LimitsConfig,
        cipher: &CredentialCipher,
    ) -> Result<Self> {
        let auth = match &host.auth {
            AuthConfig::Password { password } => {
                AuthMethod::Password(password.reveal(cipher)?)
            }
            AuthConfig::PrivateKey {
                key,
                path,
                passphrase,
            } => {
                let pem = match (key, path) {
                    (Some(key), None) => key.reveal(cipher)?,
                    (None, Some(path)) => read_key_file(&host.user, path)?,
                    _ => {
                        return Err(BridgeError::AuthConfig {
                            user: host.user.clone(),
                            reason: "private_key auth requires exactly one of key or path"
                                .to_string(),
                        });
                    }
                };
                let passphrase = passphrase
                    .as_ref()
                    .map(|p: &SecretValue| p.reveal(cipher))
                    .transpose()?
                    .filter(|p| !p.is_empty());
                AuthMethod::PrivateKey { pem, passphrase }
            }
        };

        if let AuthMethod::PrivateKey { pem, .. } = &auth {
            if pem.trim().is_empty() {
                return Err(BridgeError::AuthConfig {
                    user: host.user.clone(),
                    reason: "private key is empty".to_string(),
                });
            }
        }

        Ok(Self {
            host: host.hostname.clone(),
            port: host.port,
            user: host.user.clone(),
            auth,
            trust_unknown_host: host.trust_unknown_host,
            timeout: Duration::from_secs(limits.connection_timeout_seconds),
            keepalive: Duration::from_secs(limits.keepalive_interval_seconds),
            command_timeout: Duration::from_secs(limits.command_timeout_seconds),
            algorithms: host.algorithms.clone(),
        })
    }

    /// `host:port` as dialed.
    #[must_use]
    pub fn address(&self) -> String {
        super::known_hosts::join_host_port(&self.host, self.port)
    }
}

fn read_key_file(user: &str, path: &str) -> Result<Zeroizing<String>> {
    let expanded = shellexpand::tilde(path);
    std::fs::read_to_string(expanded.as_ref())
        .map(Zeroizing::new)
        .map_err(|e| BridgeError::AuthConfig {
            user: user.to_string(),
            reason: format!("cannot read key file {path}: {e}"),
        })
}

/// Host key algorithms offered when nothing more specific is known.
#[must_use]
pub fn default_host_key_algorithms() -> Vec<Algorithm> {
    vec![
        Algorithm::Ed25519,
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP384,
        },
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP521,
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        Algorithm::Rsa { hash: None },
    ]
}

/// Host key preference: keys already trusted for this host first, then the
/// configured list, then the defaults.
#[must_use]
pub fn host_key_preference(known: &[Algorithm], configured: &[String]) -> Vec<Algorithm> {
    if !known.is_empty() {
        let mut algorithms = known.to_vec();
        // RSA keys are stored as "ssh-rsa" but verified with any RSA signature
        if known.iter().any(|a| matches!(a, Algorithm::Rsa { .. })) {
            for hash in [Some(HashAlg::Sha512), Some(HashAlg::Sha256)] {
                let rsa = Algorithm::Rsa { hash };
                if !algorithms.contains(&rsa) {
                    algorithms.insert(0, rsa);
                }
            }
        }
        return algorithms;
    }

    let parsed: Vec<Algorithm> = configured
        .iter()
        .filter_map(|name| match Algorithm::from_str(name) {
            Ok(algorithm) => Some(algorithm),
            Err(_) => {
                warn!(algorithm = %name, "Skipping unknown host key algorithm");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        default_host_key_algorithms()
    } else {
        parsed
    }
}

fn pick<N: AsRef<str> + Copy>(kind: &str, available: &[&N], names: &[String]) -> Vec<N> {
    names
        .iter()
        .filter_map(|name| {
            let found = available.iter().find(|n| n.as_ref() == name.as_str());
            if found.is_none() {
                warn!(kind = %kind, algorithm = %name, "Skipping unknown algorithm");
            }
            found.map(|n| **n)
        })
        .collect()
}

/// russh algorithm preferences for this connection.
#[must_use]
pub fn preferred_algorithms(params: &ConnectionParams, known: &[Algorithm]) -> Preferred {
    let mut preferred = Preferred {
        key: Cow::Owned(host_key_preference(known, &params.algorithms.host_key)),
        ..Preferred::default()
    };

    let ciphers = pick("cipher", cipher::ALL_CIPHERS, &params.algorithms.ciphers);
    if !ciphers.is_empty() {
        preferred.cipher = Cow::Owned(ciphers);
    }
    let kex = pick("kex", kex::ALL_KEX_ALGORITHMS, &params.algorithms.kex);
    if !kex.is_empty() {
        preferred.kex = Cow::Owned(kex);
    }
    let macs = pick("mac", mac::ALL_MAC_ALGORITHMS, &params.algorithms.mac);
    if !macs.is_empty() {
        preferred.mac = Cow::Owned(macs);
    }
    preferred
}
