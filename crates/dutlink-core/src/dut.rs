//! DUT operation facade
//!
//! The operations a test executive calls on a DUT, mapped onto protocol
//! exchanges. A [`DutSession`] owns the connection and the BER accumulator of
//! the current measurement session; nothing lives in globals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::ber::{BerAccumulator, BerReading, BitErrorCounter};
use crate::config::ConnectionConfig;
use crate::protocol::{commands::CommandKind, Command, Connection, ConnectionState, ProtocolError};

/// Addressable lane or channel on the DUT.
///
/// Only handed out by [`DutSession::get_locations`]; passed back verbatim as a
/// command parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// Identifier as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Location {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection plus measurement state for one DUT
pub struct DutSession {
    connection: Connection,
    accumulator: Mutex<BerAccumulator>,
}

impl DutSession {
    /// Create a session for `config` (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        Self::from_connection(Connection::new(config))
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection,
            accumulator: Mutex::new(BerAccumulator::new()),
        }
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn accumulator(&self) -> MutexGuard<'_, BerAccumulator> {
        self.accumulator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the configured transport. The BER total is left alone.
    pub fn connect(&self) -> Result<(), ProtocolError> {
        self.connection.connect()
    }

    /// Notify the DUT and release the transport; never fails
    pub fn disconnect(&self) {
        self.connection.disconnect()
    }

    /// Whether the transport is open
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Locations the DUT exposes, never empty
    pub fn get_locations(&self) -> Vec<Location> {
        self.connection
            .config()
            .locations
            .iter()
            .cloned()
            .map(Location)
            .collect()
    }

    /// Look up a location by name
    pub fn location(&self, name: &str) -> Option<Location> {
        self.get_locations().into_iter().find(|l| l.as_str() == name)
    }

    fn is_known_location(&self, name: &str) -> bool {
        self.connection.config().locations.iter().any(|l| l == name)
    }

    /// Device modes the DUT accepts, never empty
    pub fn get_device_modes(&self) -> Vec<String> {
        self.connection.config().device_modes.clone()
    }

    fn execute(&self, command: Command) -> Result<Vec<String>, ProtocolError> {
        Ok(self.connection.send_and_receive(&command)?.params)
    }

    /// Apply one of the modes from [`get_device_modes`](Self::get_device_modes)
    pub fn set_device_mode(&self, mode: &str) -> Result<(), ProtocolError> {
        if !self.connection.config().device_modes.iter().any(|m| m == mode) {
            return Err(ProtocolError::UnknownMode(mode.to_string()));
        }
        self.execute(Command::of(CommandKind::SetDeviceMode).param(mode))?;
        info!("Device mode set to {}", mode);
        Ok(())
    }

    /// Initialize `location`; the meaning of `arg` is up to the DUT
    pub fn init(&self, location: impl AsRef<str>, arg: &str) -> Result<(), ProtocolError> {
        self.execute(
            Command::of(CommandKind::Init)
                .param(location.as_ref())
                .param(arg),
        )?;
        Ok(())
    }

    /// Synchronize the error counter of `location` to the received pattern
    pub fn sync_pattern(&self, location: impl AsRef<str>) -> Result<(), ProtocolError> {
        self.execute(Command::of(CommandKind::SyncPattern).param(location.as_ref()))?;
        Ok(())
    }

    /// Read the counter delta of `location`.
    ///
    /// An unknown location yields the zero counter without touching the DUT,
    /// so a polling loop survives a misconfigured lane.
    pub fn get_ber(&self, location: impl AsRef<str>) -> Result<BitErrorCounter, ProtocolError> {
        let location = location.as_ref();
        if !self.is_known_location(location) {
            warn!("get_ber: unknown location {:?}, reporting zero counter", location);
            return Ok(BitErrorCounter::empty());
        }

        let params = self.execute(Command::of(CommandKind::GetBer).param(location))?;
        let delta = BitErrorCounter::from_params(&params)?;
        debug!("get_ber {}: {}", location, delta);
        Ok(delta)
    }

    /// Read the delta of `location` and fold it into the session total.
    ///
    /// A failed read leaves the total untouched.
    pub fn poll_ber(&self, location: impl AsRef<str>) -> Result<BerReading, ProtocolError> {
        let location = location.as_ref();
        let delta = self.get_ber(location)?;
        Ok(self.accumulator().record(location, delta))
    }

    /// Running BER total of the current measurement session
    pub fn ber_total(&self) -> BitErrorCounter {
        self.accumulator().total()
    }

    /// Start a new measurement session at the zero counter
    pub fn reset_measurement(&self) {
        let mut acc = self.accumulator();
        acc.reset();
        info!("Started measurement session {}", acc.session());
    }

    /// Set the error ratio a simulated DUT injects, within [0, 1]
    pub fn set_simulated_error_ratio(&self, ratio: f64) -> Result<(), ProtocolError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ProtocolError::Encoding(format!(
                "error ratio {} is outside [0, 1]",
                ratio
            )));
        }
        self.execute(
            Command::of(CommandKind::SetSimulatedErrorRatio).param(format!("{:e}", ratio)),
        )?;
        Ok(())
    }
}
