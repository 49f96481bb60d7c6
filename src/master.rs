//! # Bus Master
//!
//! Blocking host side of the bus: one request out, at most one reply back.
//!
//! ## Exchange
//! 1. Encode the packet (size preconditions are checked before anything is written)
//! 2. Write the frame and flush
//! 3. On a shared line, read back the echo of our own frame
//! 4. Decode exactly one reply, unless the packet was a group packet
//!
//! There is no retry. A timeout or framing error ends the exchange and is
//! returned to the caller.
//!
//! ```
//! use robbus::config::TransportConfig;
//! use robbus::device::BusDevice;
//! use robbus::master::BusMaster;
//! use robbus::transport::bus::SimulatedBus;
//!
//! let device = BusDevice::new(*b"KRETE1", |_: &[u8]| vec![0x3F]);
//! let bus = SimulatedBus::new().with_device(device);
//! let mut master = BusMaster::new(bus, TransportConfig::default());
//!
//! let assigned = master.assign_alias(*b"KRETE1", b'r').unwrap();
//! assert_eq!(&assigned.address, b"KRETE1");
//! let reply = master.send(b'r', &[0x12]).unwrap();
//! assert_eq!(reply.source_address, b'r');
//! assert_eq!(reply.payload, vec![0x3F]);
//! ```

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::TransportConfig;
use crate::core::packet::{DeviceAddress, OutgoingPacket, PacketKind};
use crate::core::reply::{AliasReply, Reply, ReplyPacket};
use crate::error::Result;
use crate::transport::stream::SerialTransport;
use crate::transport::Transport;
use crate::utils::metrics::{global_metrics, Timer};

pub struct BusMaster<T: Transport> {
    transport: T,
    config: TransportConfig,
}

impl<T: Transport> BusMaster<T> {
    pub fn new(transport: T, config: TransportConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Run one request/reply exchange.
    ///
    /// Returns `Ok(None)` for group packets. An alias packet is answered with
    /// an [`AliasReply`], a unicast packet with a [`ReplyPacket`]. Checksum and
    /// length problems are reported on the reply, not as errors.
    pub fn exchange(&mut self, packet: &OutgoingPacket) -> Result<Option<Reply>> {
        let reply = match packet.kind() {
            PacketKind::AliasAssign => {
                Some(Reply::Alias(self.request(packet, AliasReply::read_from)?))
            }
            PacketKind::Unicast => {
                Some(Reply::Data(self.request(packet, ReplyPacket::read_from)?))
            }
            PacketKind::Group => {
                self.request(packet, |_: &mut T, _| Ok(()))?;
                debug!("Group packet sent, no reply expected");
                None
            }
        };
        if let Some(reply) = &reply {
            global_metrics().record_reply(reply);
        }
        Ok(reply)
    }

    /// Bind `alias` to the device at `address`; the device answers with its address
    pub fn assign_alias(&mut self, address: DeviceAddress, alias: u8) -> Result<AliasReply> {
        let reply = self.request(
            &OutgoingPacket::assign_alias(alias, address),
            AliasReply::read_from,
        )?;
        global_metrics().alias_reply_received(&reply);
        Ok(reply)
    }

    pub fn release_alias(&mut self, address: DeviceAddress) -> Result<AliasReply> {
        let reply = self.request(&OutgoingPacket::release_alias(address), AliasReply::read_from)?;
        global_metrics().alias_reply_received(&reply);
        Ok(reply)
    }

    /// Unicast `payload` to the device answering to `alias`
    pub fn send(&mut self, alias: u8, payload: &[u8]) -> Result<ReplyPacket> {
        let reply = self.request(
            &OutgoingPacket::unicast(alias, payload.to_vec()),
            ReplyPacket::read_from,
        )?;
        global_metrics().reply_received(&reply);
        Ok(reply)
    }

    /// Deliver `payload` to every device matching `alias` under `mask`
    pub fn send_group(&mut self, alias: u8, mask: u8, payload: &[u8]) -> Result<()> {
        self.exchange(&OutgoingPacket::group(alias, mask, payload.to_vec()))
            .map(|_| ())
    }

    /// Write `packet`, swallow its echo, then hand the line to `read_reply`.
    #[instrument(skip(self, packet, read_reply), fields(kind = packet.kind().name(), alias = packet.alias()))]
    fn request<R, F>(&mut self, packet: &OutgoingPacket, read_reply: F) -> Result<R>
    where
        F: FnOnce(&mut T, Duration) -> Result<R>,
    {
        let _timer = Timer::start("bus_exchange");

        let outcome = match self.write_frame(packet) {
            Ok(()) => read_reply(&mut self.transport, self.config.read_timeout),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            global_metrics().record_error(e);
        }
        outcome
    }

    fn write_frame(&mut self, packet: &OutgoingPacket) -> Result<()> {
        let frame = packet.to_bytes()?;

        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        global_metrics().frame_sent(frame.len() as u64);
        debug!(len = frame.len(), "Frame written");

        if self.config.consume_echo {
            self.consume_echo(&frame)?;
        }
        Ok(())
    }

    fn consume_echo(&mut self, frame: &[u8]) -> Result<()> {
        let mut mismatched = false;
        for &sent in frame {
            let heard = self.transport.read_byte(self.config.read_timeout)?;
            mismatched |= heard != sent;
        }
        if mismatched && self.config.verify_echo {
            warn!(len = frame.len(), "Echo differs from the frame written");
        }
        Ok(())
    }
}

impl BusMaster<SerialTransport> {
    /// Open the serial device named in `config` and drive it
    pub fn open(config: TransportConfig) -> Result<Self> {
        let transport = SerialTransport::open(&config)?;
        Ok(Self::new(transport, config))
    }
}
