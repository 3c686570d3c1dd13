mod client;
mod connector;
mod exec;
pub mod known_hosts;
mod params;

pub use client::{
    DEFAULT_COLS, DEFAULT_ROWS, HostKeyPolicy, SshClient, add_fingerprint, probe_host_key,
};
pub use connector::{ConnectState, SshConnector};
pub use known_hosts::{HostTrustStore, VerifyResult, fingerprint};
pub use params::{AuthMethod, ConnectionParams, default_host_key_algorithms};
