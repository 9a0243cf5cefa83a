//! DUT Command Protocol
//!
//! Implements the line-oriented text protocol spoken by DUT control endpoints.
//!
//! ```text
//! Request:  <command>[:<param1>[:<param2>...]]\n
//! Response: OK[:<result1>[:...]]\n
//!        or <ERRORTOKEN>:<detail>\n
//! ```

pub mod commands;
mod connection;
mod error;
mod frame;
pub mod serial;
pub mod stream;

pub use commands::Command;
pub use connection::{Connection, ConnectionState, TrafficCounters};
pub use error::ProtocolError;
pub use frame::{decode_request, ResponseFrame};
pub use serial::{list_ports, PortInfo};
pub use stream::{open_transport, SerialTransport, TcpTransport, Transport};

/// Separator between the command name and its parameters
pub const DELIMITER: char = ':';

/// Frame terminator
pub const TERMINATOR: char = '\n';

/// Status token of a successful response
pub const STATUS_OK: &str = "OK";

/// Default baud rate for serial DUT links (9600 8N1)
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default TCP port of a networked DUT
pub const DEFAULT_TCP_PORT: u16 = 8080;

/// Default timeout for a write or a response line in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Longest response line accepted before the stream is considered corrupt
pub const MAX_LINE_LEN: usize = 4096;
