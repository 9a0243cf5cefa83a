//! # dutlink Core Library
//!
//! Core functionality for driving a Device Under Test (DUT) during bit error
//! ratio testing.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The line-oriented DUT command protocol (framing, validation, response decoding)
//! - TCP and serial transports behind a single blocking `Transport` trait
//! - Connection lifecycle management with one exchange in flight at a time
//! - Saturating bit error counter accumulation across polls
//! - A virtual DUT that speaks the same protocol, for demos and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use dutlink_core::{config::ConnectionConfig, dut::DutSession};
//!
//! let session = DutSession::new(ConnectionConfig::default());
//! session.connect()?;
//!
//! let location = session.get_locations()[0].clone();
//! session.sync_pattern(&location)?;
//!
//! let reading = session.poll_ber(&location)?;
//! println!("BER: {:?}", reading.total.error_ratio());
//! ```

pub mod ber;
pub mod config;
pub mod dut;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ber::{BerAccumulator, BerReading, BitErrorCounter, SimpleCounts, SplitCounts};
    pub use crate::config::{ConnectionConfig, ReconnectPolicy, TransportConfig};
    pub use crate::dut::{DutSession, Location};
    pub use crate::protocol::{
        Command, Connection, ConnectionState, ProtocolError, ResponseFrame, Transport,
    };
    pub use crate::sim::{SimTransport, VirtualDut};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
