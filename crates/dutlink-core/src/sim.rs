//! Virtual DUT
//!
//! A DUT that speaks the control protocol and produces bit error counters from
//! a configurable error ratio. Used for demo mode, for exercising a setup
//! without hardware, and in tests. It can be reached in-memory through
//! [`SimTransport`] or over TCP through [`serve`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::protocol::{commands::CommandKind, decode_request, Command, ResponseFrame, Transport};

/// Error token the virtual DUT answers failures with
pub const ERROR_TOKEN: &str = "ERR";

/// Error ratio a fresh virtual DUT injects
pub const DEFAULT_ERROR_RATIO: f64 = 4.2e-9;

/// Bits compared per `DUT_getBER` poll
pub const DEFAULT_BITS_PER_POLL: u64 = 2_000_000;

/// Simulated DUT state
#[derive(Debug)]
pub struct VirtualDut {
    locations: Vec<String>,
    modes: Vec<String>,
    mode: Option<String>,
    synced: HashSet<String>,
    error_ratio: f64,
    bits_per_poll: u64,
    rng: StdRng,
}

impl Default for VirtualDut {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDut {
    /// Virtual DUT with one lane and two modes
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic virtual DUT
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            locations: vec!["Lane1".to_string()],
            modes: vec!["Mode1".to_string(), "Mode2".to_string()],
            mode: None,
            synced: HashSet::new(),
            error_ratio: DEFAULT_ERROR_RATIO,
            bits_per_poll: DEFAULT_BITS_PER_POLL,
            rng,
        }
    }

    /// Replace the lanes the DUT answers for
    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Set the bits compared per poll
    pub fn with_bits_per_poll(mut self, bits: u64) -> Self {
        self.bits_per_poll = bits;
        self
    }

    /// Set the injected error ratio, clamped to [0, 1]
    pub fn with_error_ratio(mut self, ratio: f64) -> Self {
        self.error_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Injected error ratio
    pub fn error_ratio(&self) -> f64 {
        self.error_ratio
    }

    /// Active device mode
    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Whether `location` is synchronized
    pub fn is_synced(&self, location: &str) -> bool {
        self.synced.contains(location)
    }

    /// Answer one raw request line
    pub fn handle_line(&mut self, line: &[u8]) -> ResponseFrame {
        match decode_request(line) {
            Ok(command) => self.handle(&command),
            Err(e) => ResponseFrame::error(ERROR_TOKEN, format!("malformed request ({})", e)),
        }
    }

    /// Answer one decoded request
    pub fn handle(&mut self, command: &Command) -> ResponseFrame {
        let Some(kind) = CommandKind::from_name(command.name()) else {
            return fail(format!("unknown command {}", command.name()));
        };
        let params = command.parameters();

        match kind {
            CommandKind::Disconnect => {
                self.synced.clear();
                done()
            }
            CommandKind::Init => match params {
                [location, _arg] if self.knows(location) => {
                    self.synced.remove(location.as_str());
                    done()
                }
                [location, _arg] => fail(format!("unknown location {}", location)),
                _ => fail("bad argument"),
            },
            CommandKind::SyncPattern => match params {
                [location] if self.knows(location) => {
                    self.synced.insert(location.clone());
                    done()
                }
                [location] => fail(format!("unknown location {}", location)),
                _ => fail("bad argument"),
            },
            CommandKind::GetBer => match params {
                [location] if self.knows(location) => {
                    let counts = if self.is_synced(location) {
                        self.sample()
                    } else {
                        [0; 4]
                    };
                    ResponseFrame::ok(counts.iter().map(u64::to_string))
                }
                [location] => fail(format!("unknown location {}", location)),
                _ => fail("bad argument"),
            },
            CommandKind::SetDeviceMode => match params {
                [mode] if self.modes.contains(mode) => {
                    self.mode = Some(mode.clone());
                    done()
                }
                [mode] => fail(format!("unknown mode {}", mode)),
                _ => fail("bad argument"),
            },
            CommandKind::SetSimulatedErrorRatio => {
                match params.first().and_then(|p| p.parse::<f64>().ok()) {
                    Some(ratio) if (0.0..=1.0).contains(&ratio) => {
                        self.error_ratio = ratio;
                        done()
                    }
                    _ => fail("invalid error ratio"),
                }
            }
        }
    }

    fn knows(&self, location: &str) -> bool {
        self.locations.iter().any(|l| l == location)
    }

    /// compared_ones, compared_zeros, errored_ones, errored_zeros for one poll
    fn sample(&mut self) -> [u64; 4] {
        let ones = self.bits_per_poll / 2;
        let zeros = self.bits_per_poll - ones;
        [ones, zeros, self.errors_in(ones), self.errors_in(zeros)]
    }

    /// Expected errors, with the fractional part rounded up at random
    fn errors_in(&mut self, bits: u64) -> u64 {
        let expected = bits as f64 * self.error_ratio;
        let whole = expected.floor();
        let extra = u64::from(self.rng.gen::<f64>() < expected - whole);
        (whole as u64).saturating_add(extra).min(bits)
    }
}

fn done() -> ResponseFrame {
    ResponseFrame::ok(Vec::<String>::new())
}

fn fail(detail: impl Into<String>) -> ResponseFrame {
    ResponseFrame::error(ERROR_TOKEN, detail)
}

/// In-memory transport wired straight to a [`VirtualDut`]
#[derive(Debug)]
pub struct SimTransport {
    dut: VirtualDut,
    responses: VecDeque<Vec<u8>>,
}

impl SimTransport {
    /// Transport to `dut`
    pub fn new(dut: VirtualDut) -> Self {
        Self {
            dut,
            responses: VecDeque::new(),
        }
    }

    /// The simulated DUT
    pub fn dut(&self) -> &VirtualDut {
        &self.dut
    }
}

impl Transport for SimTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        for line in frame.split_inclusive(|&b| b == b'\n') {
            let response = self.dut.handle_line(line);
            self.responses.push_back(response.encode());
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        self.responses
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "virtual DUT has nothing to say"))
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.responses.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "sim://virtual-dut".to_string()
    }
}

/// Serve one TCP client until it disconnects or sends `DUT_disconnect`
pub fn serve_client(stream: TcpStream, dut: &mut VirtualDut) -> io::Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("Virtual DUT: client {} connected", peer);

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let response = dut.handle_line(&line);
        debug!(
            "Virtual DUT: {} -> {}",
            String::from_utf8_lossy(&line).trim_end(),
            String::from_utf8_lossy(&response.encode()).trim_end()
        );
        writer.write_all(&response.encode())?;
        writer.flush()?;

        let kind = decode_request(&line)
            .ok()
            .and_then(|command| CommandKind::from_name(command.name()));
        if kind == Some(CommandKind::Disconnect) {
            break;
        }
    }

    info!("Virtual DUT: client {} disconnected", peer);
    Ok(())
}

/// Accept clients one at a time, forever
pub fn serve(listener: TcpListener, mut dut: VirtualDut) -> io::Result<()> {
    info!("Virtual DUT listening on {}", listener.local_addr()?);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = serve_client(stream, &mut dut) {
                    warn!("Virtual DUT: client error: {}", e);
                }
            }
            Err(e) => warn!("Virtual DUT: accept failed: {}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ask(dut: &mut VirtualDut, line: &str) -> String {
        String::from_utf8(dut.handle_line(line.as_bytes()).encode()).unwrap()
    }

    #[test]
    fn test_unsynced_lane_reports_zero() {
        let mut dut = VirtualDut::with_seed(1);
        assert_eq!(ask(&mut dut, "DUT_getBER:Lane1\n"), "OK:0:0:0:0\n");
    }

    #[test]
    fn test_synced_lane_counts_bits() {
        let mut dut = VirtualDut::with_seed(1).with_bits_per_poll(1000).with_error_ratio(0.0);
        assert_eq!(ask(&mut dut, "DUT_syncPattern:Lane1\n"), "OK\n");
        assert_eq!(ask(&mut dut, "DUT_getBER:Lane1\n"), "OK:500:500:0:0\n");
    }

    #[test]
    fn test_full_error_ratio() {
        let mut dut = VirtualDut::with_seed(1).with_bits_per_poll(10);
        ask(&mut dut, "DUT_setSimulatedErrorRatio:1\n");
        ask(&mut dut, "DUT_syncPattern:Lane1\n");
        assert_eq!(ask(&mut dut, "DUT_getBER:Lane1\n"), "OK:5:5:5:5\n");
    }

    #[test]
    fn test_init_drops_sync() {
        let mut dut = VirtualDut::with_seed(1);
        ask(&mut dut, "DUT_syncPattern:Lane1\n");
        assert!(dut.is_synced("Lane1"));
        assert_eq!(ask(&mut dut, "DUT_Init:Lane1:argX\n"), "OK\n");
        assert!(!dut.is_synced("Lane1"));
    }

    #[test]
    fn test_errors() {
        let mut dut = VirtualDut::with_seed(1);
        assert_eq!(ask(&mut dut, "DUT_Init:Lane1\n"), "ERR:bad argument\n");
        assert_eq!(ask(&mut dut, "DUT_getBER:Lane7\n"), "ERR:unknown location Lane7\n");
        assert_eq!(ask(&mut dut, "DUT_setDeviceMode:Mode3\n"), "ERR:unknown mode Mode3\n");
        assert_eq!(ask(&mut dut, "DUT_fly\n"), "ERR:unknown command DUT_fly\n");
        assert_eq!(
            ask(&mut dut, "DUT_setSimulatedErrorRatio:lots\n"),
            "ERR:invalid error ratio\n"
        );
    }

    #[test]
    fn test_mode_and_ratio_are_applied() {
        let mut dut = VirtualDut::with_seed(1);
        ask(&mut dut, "DUT_setDeviceMode:Mode2\n");
        ask(&mut dut, "DUT_setSimulatedErrorRatio:1e-3\n");
        assert_eq!(dut.mode(), Some("Mode2"));
        assert_eq!(dut.error_ratio(), 1e-3);
    }

    #[test]
    fn test_sim_transport_answers_in_order() {
        let mut transport = SimTransport::new(VirtualDut::with_seed(1));
        transport.write_frame(b"DUT_syncPattern:Lane1\n").unwrap();
        assert_eq!(transport.read_line().unwrap(), b"OK\n".to_vec());
        assert_eq!(
            transport.read_line().unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }
}
