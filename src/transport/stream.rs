//! Blocking transport over `std::io` streams.
//!
//! Works with anything `Read + Write` that can take a read deadline: a serial
//! port opened through `serialport` ([`SerialTransport::open`]), a TCP serial
//! bridge (ser2net and friends), or a socket pair in tests. The deadline is
//! pushed down through [`ReadTimeout`] whenever it changes. A zero deadline
//! means "only what has already arrived".

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{info, trace, warn};

use crate::config::TransportConfig;
use crate::error::{constants, Result, RobbusError};
use crate::transport::Transport;

/// Streams that can apply a read deadline before each read
pub trait ReadTimeout {
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        // std rejects a zero read timeout
        if timeout.is_zero() {
            return self.set_nonblocking(true);
        }
        self.set_nonblocking(false)?;
        self.set_read_timeout(Some(timeout))
    }
}

impl ReadTimeout for Box<dyn SerialPort> {
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_timeout(timeout).map_err(std::io::Error::from)
    }
}

/// Serial line opened by device path
pub type SerialTransport = StreamTransport<Box<dyn SerialPort>>;

impl SerialTransport {
    /// Open `config.device` at `config.baud_rate`, 8N1, with `config.read_timeout`
    /// as the initial read deadline.
    pub fn open(config: &TransportConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(RobbusError::ConfigError(errors.join("; ")));
        }

        let port = serialport::new(config.device.as_str(), config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| {
                warn!(device = %config.device, error = %e, "Failed to open serial port");
                RobbusError::Io(e.into())
            })?;
        info!(device = %config.device, baud = config.baud_rate, "Serial port opened");

        Ok(Self {
            stream: port,
            applied_timeout: Some(config.read_timeout),
        })
    }
}

/// [`Transport`] over a blocking `Read + Write` stream
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    applied_timeout: Option<Duration>,
}

impl<S> StreamTransport<S>
where
    S: Read + Write + ReadTimeout,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            applied_timeout: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: Read + Write + ReadTimeout,
{
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.stream.write_all(&[byte])?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        if self.applied_timeout != Some(timeout) {
            self.stream.apply_read_timeout(timeout)?;
            self.applied_timeout = Some(timeout);
        }

        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    trace!("{}", constants::ERR_CONNECTION_CLOSED);
                    return Err(RobbusError::ConnectionClosed);
                }
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    trace!(?timeout, "{}", constants::ERR_TRANSPORT_TIMEOUT);
                    return Err(RobbusError::TransportTimeout);
                }
                Err(e) => return Err(RobbusError::Io(e)),
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }
}
