//! Protocol errors

use std::io;

use thiserror::Error;

/// Errors that can occur during DUT communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A command could not be framed; nothing was sent.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// No transport is open.
    #[error("Not connected to DUT")]
    NotConnected,

    /// Opening the transport failed.
    #[error("Connection failed: {0}")]
    Connect(#[source] io::Error),

    /// I/O fault or timeout on the byte stream.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The DUT answered a well-formed request with an error status.
    #[error("DUT could not execute \"{command}\": {detail}")]
    Device {
        /// Wire name of the rejected command
        command: String,
        /// Detail field of the error response, empty when the DUT sent none
        detail: String,
    },

    /// An OK response whose payload does not have the expected shape.
    #[error("Invalid response from DUT: {0}")]
    InvalidResponse(String),

    /// The mode is not in the configured device mode list; nothing was sent.
    #[error("Unknown device mode: {0}")]
    UnknownMode(String),
}

impl ProtocolError {
    /// Create a device error for `command` with the DUT supplied detail
    pub fn device(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Device {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// True when the underlying transport gave up waiting
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) | Self::Connect(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// True when the DUT itself reported the failure
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = ProtocolError::device("DUT_Init", "bad argument");
        assert_eq!(
            err.to_string(),
            "DUT could not execute \"DUT_Init\": bad argument"
        );
        assert!(err.is_device_error());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_classification() {
        let err = ProtocolError::from(io::Error::new(io::ErrorKind::TimedOut, "read"));
        assert!(err.is_timeout());

        let err = ProtocolError::from(io::Error::new(io::ErrorKind::BrokenPipe, "write"));
        assert!(!err.is_timeout());
    }
}
