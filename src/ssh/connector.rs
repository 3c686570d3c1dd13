//! SSH Connector
//!
//! Drives one host through `Idle → Authenticating → TofuPending → Connected
//! → Closed`. `Failed` is entered from any state when an attempt errors and
//! stays until the next `connect`.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::client::{self, HostKeyPolicy, SshClient};
use super::known_hosts::HostTrustStore;
use super::params::ConnectionParams;
use crate::config::Config;
use crate::crypto::CredentialCipher;
use crate::error::{BridgeError, Result};
use crate::ports::{Connection, HostFingerprint};

/// Lifecycle of the connector's current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Authenticating,
    TofuPending,
    Connected,
    Closed,
    Failed,
}

/// Connects one configured host, verifying it against the trust store.
#[derive(Debug, Clone)]
pub struct SshConnector {
    params: ConnectionParams,
    store: HostTrustStore,
    state: Arc<Mutex<ConnectState>>,
}

impl SshConnector {
    #[must_use]
    pub fn new(params: ConnectionParams, store: HostTrustStore) -> Self {
        Self {
            params,
            store,
            state: Arc::new(Mutex::new(ConnectState::Idle)),
        }
    }

    /// Connector for the host configured under `alias`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHost` if no such host is configured, or the error from
    /// resolving its credentials.
    pub fn from_config(config: &Config, alias: &str, cipher: &CredentialCipher) -> Result<Self> {
        let host = config
            .hosts
            .get(alias)
            .ok_or_else(|| BridgeError::UnknownHost {
                host: alias.to_string(),
            })?;
        let params = ConnectionParams::from_host(host, &config.limits, cipher)?;
        Ok(Self::new(params, HostTrustStore::from_config(&config.known_hosts)))
    }

    /// Skip host verification for this connector
    #[must_use]
    pub fn trusting_unknown_host(mut self) -> Self {
        self.params.trust_unknown_host = true;
        self
    }

    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    #[must_use]
    pub const fn store(&self) -> &HostTrustStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> ConnectState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: ConnectState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(host = %self.params.address(), from = ?*state, to = ?next, "Connector state");
            *state = next;
        }
    }

    fn policy(&self) -> HostKeyPolicy {
        if self.params.trust_unknown_host {
            HostKeyPolicy::TrustAll
        } else {
            HostKeyPolicy::Verify(self.store.clone())
        }
    }

    /// Connect and authenticate.
    ///
    /// # Errors
    ///
    /// See [`SshClient::connect`].
    pub async fn connect(&self) -> Result<Connection<SshClient>> {
        self.transition(ConnectState::Authenticating);
        match SshClient::connect(&self.params, self.policy()).await {
            Ok(Connection::Established(client)) => {
                self.transition(ConnectState::Connected);
                Ok(Connection::Established(client))
            }
            Ok(Connection::FingerprintRequired(fingerprint)) => {
                self.transition(ConnectState::TofuPending);
                Ok(Connection::FingerprintRequired(fingerprint))
            }
            Err(e) => {
                self.transition(ConnectState::Failed);
                Err(e)
            }
        }
    }

    /// Record a fingerprint the user accepted.
    ///
    /// # Errors
    ///
    /// Returns `FingerprintMismatch` if the host now presents another key.
    pub async fn add_fingerprint(&self, confirmed: &HostFingerprint) -> Result<()> {
        let result = client::add_fingerprint(&self.params, &self.store, confirmed).await;
        if result.is_err() {
            self.transition(ConnectState::Failed);
        }
        result
    }

    /// Close a client produced by this connector.
    pub async fn close(&self, client: &SshClient) {
        client.close().await;
        self.transition(ConnectState::Closed);
    }
}
