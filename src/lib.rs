//! termbridge - remote terminal session engine
//!
//! Bridges interactive SSH shells and serial consoles to a bidirectional
//! JSON message channel, with trust-on-first-use host verification,
//! machine-bound credential encryption and SFTP file operations.

#[cfg(feature = "cli")]
pub mod cli;
pub mod classify;
pub mod config;
pub mod crypto;
pub mod error;
pub mod metadata;
pub mod ports;
pub mod sftp;
pub mod ssh;
pub mod terminal;

pub use classify::{MessageCode, classify};
pub use config::Config;
pub use error::{BridgeError, Result};
pub use ports::{Connection, HostFingerprint, MessageSink, MessageSource, ProtocolAdapter};
pub use sftp::SftpHandler;
pub use ssh::{SshClient, SshConnector};
pub use terminal::{Orchestrator, ServerMessage, serve};
