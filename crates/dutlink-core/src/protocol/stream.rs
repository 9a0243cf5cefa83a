use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{serial, MAX_LINE_LEN, TERMINATOR};
use crate::config::TransportConfig;

/// Blocking, line-oriented byte stream to a DUT (TCP socket or serial line)
pub trait Transport: Send {
    /// Write one complete frame and flush it
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read one line including its terminator.
    ///
    /// Fails with `TimedOut` if no terminator arrives within the timeout and
    /// with `UnexpectedEof` if the peer closes mid-line.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop input that arrived outside of an exchange
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Human readable peer description for logs
    fn describe(&self) -> String;
}

/// Byte source whose single reads can be bounded by the time left before a
/// line deadline
pub(crate) trait TimedRead {
    fn read_within(&mut self, buf: &mut [u8], remaining: Duration) -> io::Result<usize>;
}

/// OS read timeouts reject zero
fn read_timeout(remaining: Duration) -> Duration {
    remaining.max(Duration::from_millis(1))
}

impl TimedRead for TcpStream {
    fn read_within(&mut self, buf: &mut [u8], remaining: Duration) -> io::Result<usize> {
        self.set_read_timeout(Some(read_timeout(remaining)))?;
        self.read(buf)
    }
}

impl TimedRead for Box<dyn SerialPort> {
    fn read_within(&mut self, buf: &mut [u8], remaining: Duration) -> io::Result<usize> {
        self.set_timeout(read_timeout(remaining))?;
        self.read(buf)
    }
}

/// Accumulates bytes until a terminator shows up. Bytes after the terminator
/// are kept for the next line.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Every read is bounded by the time left, so a line never takes longer
    /// than `timeout` in total.
    pub(crate) fn read_line<R: TimedRead + ?Sized>(
        &mut self,
        reader: &mut R,
        timeout: Duration,
    ) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == TERMINATOR as u8) {
                return Ok(self.pending.drain(..=pos).collect());
            }
            if self.pending.len() > MAX_LINE_LEN {
                self.pending.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("response line exceeds {} bytes", MAX_LINE_LEN),
                ));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no complete response line within {:?}", timeout),
                ));
            }

            match reader.read_within(&mut chunk, remaining) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "DUT closed the connection",
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    // deadline is checked at the top of the loop
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}

/// TCP socket transport
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    timeout: Duration,
    buffer: LineBuffer,
}

impl TcpTransport {
    /// Connect to `host:port`, trying each resolved address in turn
    pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(e) => {
                    debug!("TcpTransport: connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{}:{} did not resolve to any address", host, port),
            )
        }))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        stream.set_nodelay(true)?;
        let mut transport = Self {
            stream,
            peer,
            timeout,
            buffer: LineBuffer::default(),
        };
        transport.set_timeout(timeout)?;
        Ok(transport)
    }
}

impl Transport for TcpTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame)?;
        self.stream.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        self.buffer.read_line(&mut self.stream, self.timeout)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        self.timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let mut dropped = self.buffer.clear();

        // Drain whatever a timed-out exchange left in the socket
        self.stream.set_nonblocking(true)?;
        let mut chunk = [0u8; 512];
        let result = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;

        if dropped > 0 {
            debug!("TcpTransport: discarded {} stale bytes", dropped);
        }
        result
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// Serial line transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    buffer: LineBuffer,
}

impl SerialTransport {
    /// Open and configure `device` at `baud_rate`
    pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let port = serial::open_port(device, baud_rate, timeout)?;
        Ok(Self::new(port, timeout))
    }

    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            buffer: LineBuffer::default(),
        }
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        self.buffer.read_line(&mut self.port, self.timeout)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "serial://{}",
            self.port.name().unwrap_or_else(|| "unknown".to_string())
        )
    }
}

/// Open the transport described by `config`
pub fn open_transport(config: &TransportConfig, timeout: Duration) -> io::Result<Box<dyn Transport>> {
    match config {
        TransportConfig::Tcp { host, port } => {
            Ok(Box::new(TcpTransport::connect(host, *port, timeout)?))
        }
        TransportConfig::Serial { device, baud_rate } => {
            Ok(Box::new(SerialTransport::open(device, *baud_rate, timeout)?))
        }
    }
}
