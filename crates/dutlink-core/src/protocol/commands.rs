//! Protocol commands
//!
//! Defines the commands understood by DUT control endpoints and how a command
//! is framed onto the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ProtocolError, DELIMITER, TERMINATOR};

/// Commands of the DUT control interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Notify the DUT that the host is going away
    Disconnect,

    /// Initialize a location with a host supplied argument
    Init,

    /// Read the bit error counters of a location
    GetBer,

    /// Synchronize the error counter of a location to the received pattern
    SyncPattern,

    /// Apply a device mode
    SetDeviceMode,

    /// Set the error ratio injected by a simulated DUT
    SetSimulatedErrorRatio,
}

impl CommandKind {
    /// All commands, in wire-name order
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Disconnect,
        CommandKind::Init,
        CommandKind::GetBer,
        CommandKind::SyncPattern,
        CommandKind::SetDeviceMode,
        CommandKind::SetSimulatedErrorRatio,
    ];

    /// Literal command name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Disconnect => "DUT_disconnect",
            CommandKind::Init => "DUT_Init",
            CommandKind::GetBer => "DUT_getBER",
            CommandKind::SyncPattern => "DUT_syncPattern",
            CommandKind::SetDeviceMode => "DUT_setDeviceMode",
            CommandKind::SetSimulatedErrorRatio => "DUT_setSimulatedErrorRatio",
        }
    }

    /// Look up a command by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request: command name plus ordered string parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: Vec<String>,
}

impl Command {
    /// Create a command with an arbitrary name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create one of the known commands
    pub fn of(kind: CommandKind) -> Self {
        Self::new(kind.as_str())
    }

    /// Append a parameter
    pub fn param(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append several parameters in order
    pub fn params<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in order
    pub fn parameters(&self) -> &[String] {
        &self.params
    }

    /// Frame the command as one ASCII line.
    ///
    /// The name and every parameter are validated first: a delimiter or a
    /// line break inside a field would shift every field after it, so such
    /// commands are rejected here and never reach the transport.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.name.is_empty() {
            return Err(ProtocolError::Encoding("command name is empty".into()));
        }
        validate_field("command name", &self.name)?;
        for (idx, param) in self.params.iter().enumerate() {
            validate_field(&format!("parameter {}", idx + 1), param)?;
        }

        let mut line = String::with_capacity(
            self.name.len() + self.params.iter().map(|p| p.len() + 1).sum::<usize>() + 1,
        );
        line.push_str(&self.name);
        for param in &self.params {
            line.push(DELIMITER);
            line.push_str(param);
        }
        line.push(TERMINATOR);

        Ok(line.into_bytes())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            write!(f, "{}{}", DELIMITER, param)?;
        }
        Ok(())
    }
}

/// Reject anything that would break single-line ASCII framing
fn validate_field(what: &str, value: &str) -> Result<(), ProtocolError> {
    if let Some(c) = value
        .chars()
        .find(|&c| c == DELIMITER || c == TERMINATOR || c == '\r' || !c.is_ascii())
    {
        return Err(ProtocolError::Encoding(format!(
            "{} {:?} contains illegal character {:?}",
            what, value, c
        )));
    }
    Ok(())
}
