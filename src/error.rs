use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Unknown host alias: {host}")]
    UnknownHost { host: String },

    // SSH errors
    #[error("Invalid authentication configuration for {user}: {reason}")]
    AuthConfig { user: String, reason: String },

    #[error("SSH connection failed to {host}: {reason}")]
    SshConnection { host: String, reason: String },

    #[error("SSH connection to {host} timed out after {seconds}s")]
    SshTimeout { host: String, seconds: u64 },

    #[error("SSH authentication failed for {user}@{host}")]
    SshAuth { user: String, host: String },

    #[error("SSH channel error: {reason}")]
    SshChannel { reason: String },

    #[error(
        "Host key for {host} does not match known_hosts line {line}, possible man-in-the-middle attack"
    )]
    HostKeyChanged { host: String, line: usize },

    #[error("Host fingerprint mismatch for {host}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to update known_hosts: {reason}")]
    KnownHosts { reason: String },

    // Credential errors
    #[error("Credential crypto error: {reason}")]
    Crypto { reason: String },

    // Session channel errors
    #[error("Session channel already closed")]
    ChannelClosed,

    #[error("Inbound message exceeds read limit of {limit} bytes")]
    ReadLimitExceeded { limit: usize },

    // File transfer errors
    #[error("SFTP session is not connected")]
    NotConnected,

    #[error("SFTP session is already connected to {host}")]
    AlreadyConnected { host: String },

    #[error("{path} is a directory, directory transfer not supported")]
    IsDirectory { path: String },

    #[error("SFTP error: {reason}")]
    Sftp { reason: String },

    #[error("File transfer error: {reason}")]
    FileTransfer { reason: String },

    // Serial errors
    #[error("Serial port {port} error: {reason}")]
    Serial { port: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

impl BridgeError {
    /// Whether retrying the same operation can never succeed.
    ///
    /// Fatal errors come from caller misconfiguration or failed integrity
    /// checks, so the caller must surface them instead of reconnecting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthConfig { .. }
                | Self::HostKeyChanged { .. }
                | Self::FingerprintMismatch { .. }
                | Self::Crypto { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
