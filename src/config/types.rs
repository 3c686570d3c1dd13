use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::crypto::{CredentialCipher, SecretField};
use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: HashMap<String, HostConfig>,

    #[serde(default)]
    pub serial: HashMap<String, SerialConfig>,

    #[serde(default)]
    pub known_hosts: KnownHostsConfig,

    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub user: String,

    pub auth: AuthConfig,

    /// Skip host key verification entirely.
    ///
    /// This disables the trust-on-first-use prompt and accepts any key,
    /// including a changed one.
    #[serde(default)]
    pub trust_unknown_host: bool,

    #[serde(default)]
    pub algorithms: AlgorithmConfig,
}

const fn default_port() -> u16 {
    22
}

/// A secret as written in the config file: either plaintext or a sealed
/// `{ciphertext, salt}` pair produced by `termbridge encrypt`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SecretValue {
    Sealed(SecretField),
    Plain(Zeroizing<String>),
}

impl SecretValue {
    /// Plaintext of this secret, decrypting sealed values.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if a sealed value cannot be decrypted.
    pub fn reveal(&self, cipher: &CredentialCipher) -> Result<Zeroizing<String>> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Sealed(field) => cipher.decrypt(field),
        }
    }
}

/// SSH authentication configuration.
///
/// Exactly one of `key` (inline PEM) and `path` must be set for
/// `private_key` auth; the loader enforces this.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Password {
        password: SecretValue,
    },
    PrivateKey {
        #[serde(default)]
        key: Option<SecretValue>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        passphrase: Option<SecretValue>,
    },
}

/// Optional algorithm overrides, by their SSH wire names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlgorithmConfig {
    #[serde(default)]
    pub host_key: Vec<String>,
    #[serde(default)]
    pub ciphers: Vec<String>,
    #[serde(default)]
    pub kex: Vec<String>,
    #[serde(default)]
    pub mac: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

const fn default_baud_rate() -> u32 {
    9600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnownHostsConfig {
    #[serde(default = "default_known_hosts_path")]
    pub path: String,
}

impl Default for KnownHostsConfig {
    fn default() -> Self {
        Self {
            path: default_known_hosts_path(),
        }
    }
}

fn default_known_hosts_path() -> String {
    "~/.ssh/known_hosts".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminalConfig {
    /// Interval between output buffer flushes toward the client
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl TerminalConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

const fn default_flush_interval_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connection_timeout_seconds: default_connection_timeout(),
            command_timeout_seconds: default_command_timeout(),
            keepalive_interval_seconds: default_keepalive_interval(),
        }
    }
}

const fn default_connection_timeout() -> u64 {
    10
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_keepalive_interval() -> u64 {
    30
}
