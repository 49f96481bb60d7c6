//! # Bus Device
//!
//! Receive state machine of a RobBus slave, fed one wire byte at a time.
//! It is what sits at the far end of the line, so the host codec can be
//! exercised end-to-end without hardware (see
//! [`SimulatedBus`](crate::transport::bus::SimulatedBus)).
//!
//! ## Behaviour
//! - A marker byte (`0x01`/`0x02`/`0x03`) always restarts the machine, so a
//!   device resynchronises on the next frame after any garbage.
//! - Alias-assign frames must carry this device's full address. On a good
//!   checksum the alias is adopted (or dropped for `ALIAS_RELEASE`) and the
//!   device answers with an [`AliasReply`](crate::core::reply::AliasReply):
//!   its address, no length byte, and a raw checksum over the address.
//! - Unicast frames are accepted only for the device's own alias.
//! - Group frames are accepted when `mask & alias == mask & device_alias`. They
//!   are handed to the command handler but never answered.
//! - Anything carrying the reply flag (`0x80`) in its alias is another device
//!   talking and is ignored. Frames with a bad checksum are dropped silently.

use tracing::{debug, trace};

use crate::config::{
    ALIAS_PACKET_HEAD, ALIAS_RELEASE, DEVICE_ADDRESS_LEN, ESCAPE_PREFIX, ESCAPE_SHIFT,
    GROUP_PACKET_HEAD, MAX_PAYLOAD_LEN, NO_ALIAS, REPLY_ADDRESS_OFFSET, UNICAST_PACKET_HEAD,
};
use crate::core::checksum::Checksum;
use crate::core::packet::DeviceAddress;
use crate::core::reply::{AliasReply, ReplyPacket};

/// Default receive buffer, as on the smallest AVR targets
pub const DEFAULT_RX_CAPACITY: usize = 10;

/// Application logic behind a device: request payload in, reply payload out
pub trait CommandHandler: Send {
    fn handle(&mut self, request: &[u8]) -> Vec<u8>;
}

impl<F> CommandHandler for F
where
    F: FnMut(&[u8]) -> Vec<u8> + Send,
{
    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        self(request)
    }
}

/// Handler that answers with the request payload
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        request.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    AssignAlias,
    AssignAddress { alias: u8, index: usize },
    AssignChecksum { alias: u8 },
    GroupAlias,
    GroupMask { alias: u8 },
    Alias,
    Length,
    Data { remaining: u8 },
    Checksum,
}

pub struct BusDevice {
    address: DeviceAddress,
    alias: u8,
    handler: Box<dyn CommandHandler>,
    capacity: usize,
    state: RxState,
    escaped: bool,
    group: bool,
    checksum: Checksum,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for BusDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusDevice")
            .field("address", &self.address)
            .field("alias", &self.alias)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl BusDevice {
    pub fn new<H: CommandHandler + 'static>(address: DeviceAddress, handler: H) -> Self {
        Self {
            address,
            alias: NO_ALIAS,
            handler: Box::new(handler),
            capacity: DEFAULT_RX_CAPACITY,
            state: RxState::Idle,
            escaped: false,
            group: false,
            checksum: Checksum::new(),
            buffer: Vec::with_capacity(DEFAULT_RX_CAPACITY),
        }
    }

    /// Start with an alias already bound
    pub fn with_alias(mut self, alias: u8) -> Self {
        self.alias = alias;
        self
    }

    /// Receive buffer size; payload bytes past it are dropped
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.min(MAX_PAYLOAD_LEN);
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Current alias, `NO_ALIAS` when unbound
    pub fn alias(&self) -> u8 {
        self.alias
    }

    /// Feed every byte of `wire`, collecting the replies produced
    pub fn process(&mut self, wire: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &byte in wire {
            if let Some(reply) = self.process_byte(byte) {
                out.extend_from_slice(&reply);
            }
        }
        out
    }

    /// Feed one wire byte; returns the reply wire bytes when a frame completes
    pub fn process_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            ALIAS_PACKET_HEAD => return self.restart(RxState::AssignAlias, false),
            UNICAST_PACKET_HEAD => return self.restart(RxState::Alias, false),
            GROUP_PACKET_HEAD => return self.restart(RxState::GroupAlias, true),
            ESCAPE_PREFIX => {
                self.escaped = true;
                return None;
            }
            _ => {}
        }

        let value = if self.escaped {
            self.escaped = false;
            byte.wrapping_sub(ESCAPE_SHIFT)
        } else {
            byte
        };
        trace!(value, state = ?self.state, "device byte");

        let state = self.state;
        self.state = match state {
            RxState::Idle => RxState::Idle,

            RxState::AssignAlias => {
                if value & REPLY_ADDRESS_OFFSET != 0 {
                    RxState::Idle
                } else {
                    self.checksum = self.checksum.add(value);
                    RxState::AssignAddress {
                        alias: value,
                        index: 0,
                    }
                }
            }
            RxState::AssignAddress { alias, index } => {
                if value != self.address[index] {
                    RxState::Idle
                } else {
                    self.checksum = self.checksum.add(value);
                    if index + 1 == DEVICE_ADDRESS_LEN {
                        RxState::AssignChecksum { alias }
                    } else {
                        RxState::AssignAddress {
                            alias,
                            index: index + 1,
                        }
                    }
                }
            }
            RxState::AssignChecksum { alias } => {
                self.state = RxState::Idle;
                if self.checksum.add(value).verify() {
                    return self.adopt_alias(alias);
                }
                RxState::Idle
            }

            RxState::GroupAlias => {
                if value & REPLY_ADDRESS_OFFSET != 0 {
                    RxState::Idle
                } else {
                    self.checksum = self.checksum.add(value);
                    RxState::GroupMask { alias: value }
                }
            }
            RxState::GroupMask { alias } => {
                if value & alias != value & self.alias {
                    RxState::Idle
                } else {
                    self.checksum = self.checksum.add(value);
                    RxState::Length
                }
            }

            RxState::Alias => {
                if value & REPLY_ADDRESS_OFFSET != 0 || self.alias == NO_ALIAS || value != self.alias
                {
                    RxState::Idle
                } else {
                    self.checksum = self.checksum.add(value);
                    RxState::Length
                }
            }
            RxState::Length => {
                self.checksum = self.checksum.add(value);
                self.buffer.clear();
                if value == 0 {
                    RxState::Checksum
                } else {
                    RxState::Data { remaining: value }
                }
            }
            RxState::Data { remaining } => {
                if self.buffer.len() < self.capacity {
                    self.buffer.push(value);
                }
                self.checksum = self.checksum.add(value);
                if remaining == 1 {
                    RxState::Checksum
                } else {
                    RxState::Data {
                        remaining: remaining - 1,
                    }
                }
            }
            RxState::Checksum => {
                self.state = RxState::Idle;
                if self.checksum.add(value).verify() {
                    return self.run_command();
                }
                debug!(alias = self.alias, "Dropping frame with bad checksum");
                RxState::Idle
            }
        };

        None
    }

    fn restart(&mut self, state: RxState, group: bool) -> Option<Vec<u8>> {
        self.state = state;
        self.group = group;
        self.escaped = false;
        self.checksum = Checksum::new();
        None
    }

    fn adopt_alias(&mut self, alias: u8) -> Option<Vec<u8>> {
        self.alias = if alias == ALIAS_RELEASE { NO_ALIAS } else { alias };
        debug!(address = ?self.address, alias = self.alias, "Alias updated");
        Some(AliasReply::encode_wire(alias, &self.address))
    }

    fn run_command(&mut self) -> Option<Vec<u8>> {
        let mut reply = self.handler.handle(&self.buffer);
        if self.group {
            return None;
        }
        reply.truncate(MAX_PAYLOAD_LEN);
        ReplyPacket::encode_wire(self.alias, &reply).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::OutgoingPacket;

    const ADDRESS: DeviceAddress = *b"KRETE1";

    fn wire(packet: OutgoingPacket) -> Vec<u8> {
        packet.to_bytes().unwrap()
    }

    #[test]
    fn test_reference_exchange() {
        // handler from the AVR test board: reads port C, here a fixed 0x3F
        let mut device = BusDevice::new(ADDRESS, |_: &[u8]| vec![0x3F]).with_alias(b'r');
        let reply = device.process(&wire(OutgoingPacket::unicast(b'r', vec![0x12])));
        assert_eq!(reply, vec![0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE]);
    }

    #[test]
    fn test_alias_assignment() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler);
        assert_eq!(device.alias(), NO_ALIAS);

        let reply = device.process(&wire(OutgoingPacket::assign_alias(0x21, ADDRESS)));
        assert_eq!(device.alias(), 0x21);
        // marker, 0x21|0x80, the address unescaped, raw checksum: no length byte
        assert_eq!(
            reply,
            vec![0x01, 0xA1, 0x4B, 0x52, 0x45, 0x54, 0x45, 0x31, 0x54]
        );
        let (decoded, used) = AliasReply::decode_wire(&reply).unwrap().unwrap();
        assert_eq!(used, reply.len());
        assert_eq!(decoded.alias, 0x21);
        assert_eq!(decoded.address, ADDRESS);
        assert!(decoded.checksum_valid);

        let released = device.process(&wire(OutgoingPacket::release_alias(ADDRESS)));
        assert_eq!(device.alias(), NO_ALIAS);
        assert_eq!(&released[..2], &[0x01, 0xFF]);
    }

    #[test]
    fn test_alias_for_other_device_ignored() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler);
        let reply = device.process(&wire(OutgoingPacket::assign_alias(0x21, *b"KRETE2")));
        assert!(reply.is_empty());
        assert_eq!(device.alias(), NO_ALIAS);
    }

    #[test]
    fn test_unicast_for_other_alias_ignored() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x21);
        assert!(device
            .process(&wire(OutgoingPacket::unicast(0x22, vec![1])))
            .is_empty());
    }

    #[test]
    fn test_unassigned_device_stays_silent() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler);
        assert!(device
            .process(&wire(OutgoingPacket::unicast(NO_ALIAS, vec![1])))
            .is_empty());
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x21);
        let mut frame = wire(OutgoingPacket::unicast(0x21, vec![0x40]));
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        assert!(device.process(&frame).is_empty());
    }

    #[test]
    fn test_group_processed_without_reply() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut device = BusDevice::new(ADDRESS, move |req: &[u8]| {
            sink.lock().unwrap().push(req.to_vec());
            Vec::new()
        })
        .with_alias(0x25);

        // upper nibble must match 0x20
        let reply = device.process(&wire(OutgoingPacket::group(0x20, 0xF0, vec![7])));
        assert!(reply.is_empty());
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![7u8]]);

        device.process(&wire(OutgoingPacket::group(0x30, 0xF0, vec![8])));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_escaped_payload_reaches_handler() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x02);
        let reply = device.process(&wire(OutgoingPacket::unicast(0x02, vec![0, 1, 2, 3, 4])));
        let (decoded, _) = ReplyPacket::decode_wire(&reply).unwrap().unwrap();
        assert_eq!(decoded.source_address, 0x02);
        assert_eq!(decoded.payload, vec![0, 1, 2, 3, 4]);
        assert!(decoded.checksum_valid);
    }

    #[test]
    fn test_payload_past_capacity_dropped() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler)
            .with_alias(0x21)
            .with_capacity(2);
        let reply = device.process(&wire(OutgoingPacket::unicast(0x21, vec![9, 8, 7, 6])));
        let (decoded, _) = ReplyPacket::decode_wire(&reply).unwrap().unwrap();
        assert_eq!(decoded.payload, vec![9, 8]);
    }

    #[test]
    fn test_empty_payload() {
        let mut device = BusDevice::new(ADDRESS, |_: &[u8]| vec![0xAA]).with_alias(0x21);
        let reply = device.process(&wire(OutgoingPacket::unicast(0x21, vec![])));
        let (decoded, _) = ReplyPacket::decode_wire(&reply).unwrap().unwrap();
        assert_eq!(decoded.payload, vec![0xAA]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x21);
        let mut line = vec![0x02, 0x21, 0x09, 0x44];
        line.extend(wire(OutgoingPacket::unicast(0x21, vec![0x44])));
        let reply = device.process(&line);
        assert!(!reply.is_empty());
    }

    #[test]
    fn test_other_device_reply_ignored() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x72);
        let foreign = ReplyPacket::encode_wire(0x72, &[0x3F]).unwrap();
        assert!(device.process(&foreign).is_empty());
    }

    #[test]
    fn test_other_device_alias_reply_ignored() {
        let mut device = BusDevice::new(ADDRESS, EchoHandler).with_alias(0x21);
        let foreign = AliasReply::encode_wire(0x21, b"KRETE2");
        assert!(device.process(&foreign).is_empty());
        assert_eq!(device.alias(), 0x21);

        let reply = device.process(&wire(OutgoingPacket::unicast(0x21, vec![0x44])));
        assert!(!reply.is_empty());
    }
}
