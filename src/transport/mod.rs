//! # Transports
//!
//! The codec never opens a device itself. It talks to a [`Transport`], a
//! blocking byte sink/source supplied by the application.
//!
//! ## Implementations
//! - [`stream::StreamTransport`]: any `Read + Write` with a read deadline; [`stream::SerialTransport`] opens a serial port by path
//! - [`mock::MockTransport`]: scripted bytes for tests
//! - [`bus::SimulatedBus`]: half-duplex loopback with in-process devices
//! - [`framed::AsyncBusLink`]: async exchanges over `Framed<S, RobbusCodec>`

use std::time::Duration;

use crate::error::Result;

pub mod bus;
pub mod framed;
pub mod mock;
pub mod stream;

/// Blocking byte transport with per-read deadlines
pub trait Transport {
    /// Write one byte to the line
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Read one byte, failing with `TransportTimeout` if none arrives within `timeout`
    fn read_byte(&mut self, timeout: Duration) -> Result<u8>;

    /// Write a whole frame
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Push buffered bytes onto the line
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        (**self).write_byte(byte)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        (**self).read_byte(timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
