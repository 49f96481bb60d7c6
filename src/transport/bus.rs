//! # Simulated Bus
//!
//! In-process half-duplex line with [`BusDevice`]s attached. Every byte the host
//! writes is echoed back to the host (all stations share one pair of wires)
//! and fed to every device. A device reply is queued right behind the echo and
//! is also heard by the other devices, which ignore it because of the reply
//! flag in its alias byte.
//!
//! ```
//! use robbus::device::{BusDevice, EchoHandler};
//! use robbus::transport::bus::SimulatedBus;
//!
//! let bus = SimulatedBus::new().with_device(BusDevice::new(*b"KRETE1", EchoHandler));
//! assert_eq!(bus.device_count(), 1);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use crate::device::BusDevice;
use crate::error::{Result, RobbusError};
use crate::transport::Transport;

#[derive(Debug)]
pub struct SimulatedBus {
    devices: Vec<BusDevice>,
    line: VecDeque<u8>,
    echo: bool,
    transmitted: usize,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            line: VecDeque::new(),
            echo: true,
            transmitted: 0,
        }
    }

    pub fn with_device(mut self, device: BusDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Point-to-point link without the local echo
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Option<&BusDevice> {
        self.devices.get(index)
    }

    /// Put raw bytes on the line as if another station sent them
    pub fn inject(&mut self, bytes: &[u8]) {
        self.line.extend(bytes.iter().copied());
    }

    /// Bytes waiting to be read by the host
    pub fn pending(&self) -> usize {
        self.line.len()
    }

    /// Total bytes written by the host
    pub fn transmitted(&self) -> usize {
        self.transmitted
    }

    fn broadcast(&mut self, byte: u8) {
        for index in 0..self.devices.len() {
            let Some(reply) = self.devices[index].process_byte(byte) else {
                continue;
            };
            trace!(device = index, len = reply.len(), "device replied");
            self.line.extend(reply.iter().copied());
            for (other, device) in self.devices.iter_mut().enumerate() {
                if other != index {
                    device.process(&reply);
                }
            }
        }
    }
}

impl Transport for SimulatedBus {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.transmitted += 1;
        if self.echo {
            self.line.push_back(byte);
        }
        self.broadcast(byte);
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> Result<u8> {
        self.line.pop_front().ok_or(RobbusError::TransportTimeout)
    }
}
