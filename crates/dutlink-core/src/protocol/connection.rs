//! Connection management
//!
//! Owns the transport to the DUT and runs command/response exchanges on it.
//! The protocol has no message ids, so a mutex serializes exchanges: the lock
//! is held from the write of a request until its response line is read.

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{commands::CommandKind, open_transport, Command, ProtocolError, ResponseFrame, Transport};
use crate::config::{ConnectionConfig, ReconnectPolicy};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open
    Disconnected,
    /// Transport open and ready
    Connected,
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Request frames written
    pub tx_frames: u64,
    /// Response frames read
    pub rx_frames: u64,
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    counters: TrafficCounters,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        if self.transport.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

/// DUT connection: transport lifecycle plus serialized exchanges
pub struct Connection {
    config: ConnectionConfig,
    inner: Mutex<Inner>,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                transport: None,
                counters: TrafficCounters::default(),
            }),
        }
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // exchanges never leave Inner half-updated, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Get cumulative traffic counters
    pub fn counters(&self) -> TrafficCounters {
        self.lock().counters
    }

    /// Open the configured transport
    pub fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_with(|config| open_transport(&config.transport, config.timeout()))
    }

    /// Open a transport produced by `open`.
    ///
    /// On an already open connection the configured [`ReconnectPolicy`]
    /// decides between doing nothing and replacing the transport.
    pub fn connect_with<F>(&self, open: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&ConnectionConfig) -> io::Result<Box<dyn Transport>>,
    {
        let mut inner = self.lock();

        if let Some(existing) = inner.transport.as_ref() {
            match self.config.reconnect {
                ReconnectPolicy::Keep => {
                    debug!("connect: already connected to {}, keeping", existing.describe());
                    return Ok(());
                }
                ReconnectPolicy::Reopen => {
                    info!("connect: closing {} before reopening", existing.describe());
                    inner.transport = None;
                }
            }
        }

        let mut transport = open(&self.config).map_err(ProtocolError::Connect)?;
        transport
            .set_timeout(self.config.timeout())
            .map_err(ProtocolError::Connect)?;

        info!("Connected to DUT at {}", transport.describe());
        inner.transport = Some(transport);
        Ok(())
    }

    /// Notify the DUT and release the transport.
    ///
    /// Never fails: a failed notification is logged and the transport is
    /// released anyway. Without an open transport nothing is sent.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        let Some(mut transport) = inner.transport.take() else {
            return;
        };

        let notify = Command::of(CommandKind::Disconnect).param("");
        match exchange(transport.as_mut(), &notify, &mut inner.counters) {
            Ok(_) => debug!("disconnect: DUT acknowledged"),
            Err(e) => warn!("disconnect: notification to {} failed: {}", transport.describe(), e),
        }

        info!("Disconnected from DUT at {}", transport.describe());
        drop(transport);
    }

    /// Send `command` and return its successful response.
    ///
    /// A closed connection is reported as `NotConnected` before the command
    /// is framed; framing errors surface before any transport I/O.
    ///
    /// Nothing is retried: a command may change DUT state, and only the
    /// caller knows whether it is safe to resend.
    pub fn send_and_receive(&self, command: &Command) -> Result<ResponseFrame, ProtocolError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let transport = inner.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        exchange(transport.as_mut(), command, &mut inner.counters)
    }
}

/// One request/response cycle on an exclusively held transport
fn exchange(
    transport: &mut dyn Transport,
    command: &Command,
    counters: &mut TrafficCounters,
) -> Result<ResponseFrame, ProtocolError> {
    let frame = command.encode()?;

    if let Err(e) = transport.discard_input() {
        debug!("exchange: discarding stale input failed: {}", e);
    }

    debug!("-> {}", command);
    transport.write_frame(&frame)?;
    counters.tx_bytes = counters.tx_bytes.saturating_add(frame.len() as u64);
    counters.tx_frames = counters.tx_frames.saturating_add(1);

    let line = transport.read_line()?;
    counters.rx_bytes = counters.rx_bytes.saturating_add(line.len() as u64);
    counters.rx_frames = counters.rx_frames.saturating_add(1);
    debug!("<- {}", String::from_utf8_lossy(&line).trim_end());

    ResponseFrame::parse(&line)?.into_result(command.name())
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
