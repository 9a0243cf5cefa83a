//! Connection configuration
//!
//! Everything the host supplies about how to reach the DUT: transport, timeout,
//! reconnect behaviour and the location / device mode enumerations. Loaded
//! from JSON files:
//!
//! ```json
//! {
//!   "transport": { "kind": "tcp", "host": "127.0.0.1", "port": 8080 },
//!   "timeout_ms": 2000,
//!   "reconnect": "keep",
//!   "locations": ["Lane1"],
//!   "device_modes": ["Mode1", "Mode2"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, DELIMITER, TERMINATOR};

/// Errors raised while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How to reach the DUT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// TCP socket
    Tcp {
        /// Host name or IP address
        host: String,
        /// TCP port
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    /// Serial line
    Serial {
        /// Device path or COM port name
        device: String,
        /// Baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            TransportConfig::Serial { device, baud_rate } => {
                write!(f, "serial://{}@{}", device, baud_rate)
            }
        }
    }
}

/// What `connect()` does when the connection is already open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Keep the open transport; connect is a no-op
    #[default]
    Keep,
    /// Close the open transport and open a new one
    Reopen,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport to open
    pub transport: TransportConfig,
    /// Write and response timeout in milliseconds
    pub timeout_ms: u64,
    /// Behaviour of connect() on an open connection
    pub reconnect: ReconnectPolicy,
    /// Locations (lanes) the DUT exposes
    pub locations: Vec<String>,
    /// Device modes the DUT accepts
    pub device_modes: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect: ReconnectPolicy::Keep,
            locations: vec!["Lane1".to_string()],
            device_modes: vec!["Mode1".to_string(), "Mode2".to_string()],
        }
    }
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl ConnectionConfig {
    /// TCP configuration with defaults for everything else
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportConfig::Tcp {
                host: host.into(),
                port,
            },
            ..Self::default()
        }
    }

    /// Serial configuration with defaults for everything else
    pub fn serial(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            transport: TransportConfig::Serial {
                device: device.into(),
                baud_rate,
            },
            ..Self::default()
        }
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be greater than zero".into()));
        }
        match &self.transport {
            TransportConfig::Tcp { host, .. } if host.is_empty() => {
                return Err(ConfigError::Invalid("tcp host is empty".into()));
            }
            TransportConfig::Serial { device, .. } if device.is_empty() => {
                return Err(ConfigError::Invalid("serial device is empty".into()));
            }
            TransportConfig::Serial { baud_rate: 0, .. } => {
                return Err(ConfigError::Invalid("baud_rate must be greater than zero".into()));
            }
            _ => {}
        }
        check_names("locations", &self.locations)?;
        check_names("device_modes", &self.device_modes)?;
        Ok(())
    }
}

/// Names are sent verbatim as command parameters, so they must frame cleanly
fn check_names(field: &str, names: &[String]) -> Result<(), ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
    }
    for name in names {
        if name.is_empty()
            || !name.is_ascii()
            || name.contains(DELIMITER)
            || name.contains(TERMINATOR)
            || name.contains('\r')
        {
            return Err(ConfigError::Invalid(format!(
                "{} entry {:?} is not a valid protocol parameter",
                field, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.transport.to_string(), "tcp://127.0.0.1:8080");
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.reconnect, ReconnectPolicy::Keep);
        assert_eq!(config.locations, vec!["Lane1"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_serial() {
        let config = ConnectionConfig::from_json_str(
            r#"{ "transport": { "kind": "serial", "device": "COM9" }, "reconnect": "reopen" }"#,
        )
        .unwrap();
        assert_eq!(
            config.transport,
            TransportConfig::Serial {
                device: "COM9".to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            }
        );
        assert_eq!(config.reconnect, ReconnectPolicy::Reopen);
        assert_eq!(config.device_modes, vec!["Mode1", "Mode2"]);
    }

    #[test]
    fn test_rejects_bad_locations() {
        let err = ConnectionConfig::from_json_str(r#"{ "locations": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ConnectionConfig::from_json_str(r#"{ "locations": ["Lane:1"] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = ConnectionConfig::from_json_str(r#"{ "timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = ConnectionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "transport": {{ "kind": "tcp", "host": "dut.local", "port": 9000 }}, "locations": ["Lane1", "Lane2"] }}"#
        )
        .unwrap();

        let config = ConnectionConfig::load(file.path()).unwrap();
        assert_eq!(config.transport, TransportConfig::Tcp { host: "dut.local".into(), port: 9000 });
        assert_eq!(config.locations, vec!["Lane1", "Lane2"]);
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = ConnectionConfig::serial("/dev/ttyACM0", 115200);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ConnectionConfig::from_json_str(&json).unwrap(), config);
    }
}
