//! Ports module - Trait definitions for hexagonal architecture
//!
//! This module contains the trait definitions (ports) that separate the
//! session logic from transports, client channels and remote execution.

pub mod adapter;
pub mod channel;
pub mod connector;
pub mod exec;

pub use adapter::ProtocolAdapter;
pub use channel::{MessageSink, MessageSource};
pub use connector::{Connection, HostFingerprint, SessionConnector};
pub use exec::{CommandRunner, ExecResult};
