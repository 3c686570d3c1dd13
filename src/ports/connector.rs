//! Session Connector Port
//!
//! Abstracts establishing a transport for one session, including the
//! trust-on-first-use pause, so the handshake can be exercised without a
//! real SSH server.

use async_trait::async_trait;

use super::adapter::ProtocolAdapter;
use crate::error::Result;

/// Host key presented by a host that has no trust record yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFingerprint {
    /// `host:port` as dialed.
    pub host: String,
    /// `SHA256:<base64>` fingerprint of the presented key.
    pub fingerprint: String,
}

/// Outcome of a connection attempt that did not fail.
#[derive(Debug)]
pub enum Connection<T> {
    /// Authenticated, verified and ready.
    Established(T),
    /// The host is unknown; the caller must have the fingerprint confirmed
    /// and call `add_fingerprint` before connecting again.
    FingerprintRequired(HostFingerprint),
}

impl<T> Connection<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Connection<U> {
        match self {
            Self::Established(t) => Connection::Established(f(t)),
            Self::FingerprintRequired(fp) => Connection::FingerprintRequired(fp),
        }
    }
}

/// Trait for creating session transports
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// The adapter produced by a successful connection
    type Adapter: ProtocolAdapter + 'static;

    /// Connect, authenticate and open the interactive transport.
    async fn connect(&self) -> Result<Connection<Self::Adapter>>;

    /// Record a confirmed fingerprint so the next `connect` succeeds.
    ///
    /// Implementations re-read the host key and refuse to record it if it no
    /// longer matches `fingerprint`.
    async fn add_fingerprint(&self, fingerprint: &HostFingerprint) -> Result<()>;
}
