//! Interactive terminal sessions
//!
//! The duplex protocol, the orchestrator that drives a protocol adapter, the
//! SSH and serial adapters, and the session driver with its fingerprint
//! handshake.

mod buffer;
pub mod channel;
mod negotiate;
mod orchestrator;
pub mod protocol;
mod serial;
mod ssh;

pub use buffer::OutputBuffer;
pub use channel::{ClientEnd, DEFAULT_READ_LIMIT, Frame, SessionSink, SessionSource, duplex};
pub use negotiate::serve;
pub use orchestrator::Orchestrator;
pub use protocol::{ClientMessage, ServerMessage, parse_fingerprint_reply};
pub use serial::{SerialAdapter, SerialConnector, list_ports};
pub use ssh::{SshAdapter, SshSessionConnector};
