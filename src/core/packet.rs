//! # Outgoing Packets
//!
//! The three request kinds a host can put on the bus, and the frame encoder
//! that turns them into wire bytes.
//!
//! ## Wire Format
//! ```text
//! 0x01 alias address[6]                 checksum   alias assign / release
//! 0x02 alias        length payload[len] checksum   unicast data
//! 0x03 alias mask   length payload[len] checksum   group data
//! ```
//! The marker is sent raw. Every following field byte is escaped, and the
//! checksum closes the sum of the unescaped field values (marker excluded).

use bytes::BufMut;
use tracing::debug;

use crate::config::{
    ALIAS_PACKET_HEAD, ALIAS_RELEASE, DEVICE_ADDRESS_LEN, GROUP_PACKET_HEAD, MAX_PAYLOAD_LEN,
    UNICAST_PACKET_HEAD,
};
use crate::core::checksum::Checksum;
use crate::core::escape::encode_byte;
use crate::error::{constants, Result, RobbusError};

/// Full six-byte device address
pub type DeviceAddress = [u8; DEVICE_ADDRESS_LEN];

/// Packet kind, identified on the wire by its leading marker byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    AliasAssign,
    Unicast,
    Group,
}

impl PacketKind {
    /// Marker byte opening a frame of this kind
    pub fn marker(self) -> u8 {
        match self {
            PacketKind::AliasAssign => ALIAS_PACKET_HEAD,
            PacketKind::Unicast => UNICAST_PACKET_HEAD,
            PacketKind::Group => GROUP_PACKET_HEAD,
        }
    }

    /// Detect kind from a marker byte
    pub fn from_marker(byte: u8) -> Result<Self> {
        match byte {
            ALIAS_PACKET_HEAD => Ok(PacketKind::AliasAssign),
            UNICAST_PACKET_HEAD => Ok(PacketKind::Unicast),
            GROUP_PACKET_HEAD => Ok(PacketKind::Group),
            other => Err(RobbusError::InvalidMarker(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketKind::AliasAssign => "alias-assign",
            PacketKind::Unicast => "unicast",
            PacketKind::Group => "group",
        }
    }
}

/// A request addressed to one or more devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingPacket {
    /// Bind `alias` to the device at `address`; `ALIAS_RELEASE` unbinds it
    AliasAssign { alias: u8, address: DeviceAddress },
    /// Data for the single device answering to `alias`
    UnicastData { alias: u8, payload: Vec<u8> },
    /// Data for every device whose alias matches `alias` on the bits set in `mask`
    GroupData { alias: u8, mask: u8, payload: Vec<u8> },
}

impl OutgoingPacket {
    pub fn assign_alias(alias: u8, address: DeviceAddress) -> Self {
        OutgoingPacket::AliasAssign { alias, address }
    }

    pub fn release_alias(address: DeviceAddress) -> Self {
        OutgoingPacket::AliasAssign {
            alias: ALIAS_RELEASE,
            address,
        }
    }

    /// Alias assignment from an address of unchecked length
    pub fn assign_alias_from_slice(alias: u8, address: &[u8]) -> Result<Self> {
        let address: DeviceAddress = address.try_into().map_err(|_| {
            debug!(len = address.len(), "{}", constants::ERR_ADDRESS_LENGTH);
            RobbusError::InvalidAddressLength(address.len())
        })?;
        Ok(OutgoingPacket::AliasAssign { alias, address })
    }

    pub fn unicast(alias: u8, payload: Vec<u8>) -> Self {
        OutgoingPacket::UnicastData { alias, payload }
    }

    pub fn group(alias: u8, mask: u8, payload: Vec<u8>) -> Self {
        OutgoingPacket::GroupData {
            alias,
            mask,
            payload,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            OutgoingPacket::AliasAssign { .. } => PacketKind::AliasAssign,
            OutgoingPacket::UnicastData { .. } => PacketKind::Unicast,
            OutgoingPacket::GroupData { .. } => PacketKind::Group,
        }
    }

    pub fn alias(&self) -> u8 {
        match self {
            OutgoingPacket::AliasAssign { alias, .. }
            | OutgoingPacket::UnicastData { alias, .. }
            | OutgoingPacket::GroupData { alias, .. } => *alias,
        }
    }

    /// Devices stay silent on group packets
    pub fn expects_reply(&self) -> bool {
        !matches!(self, OutgoingPacket::GroupData { .. })
    }

    /// Check size preconditions without encoding anything
    pub fn validate(&self) -> Result<()> {
        match self {
            OutgoingPacket::AliasAssign { .. } => Ok(()),
            OutgoingPacket::UnicastData { payload, .. }
            | OutgoingPacket::GroupData { payload, .. } => {
                if payload.len() > MAX_PAYLOAD_LEN {
                    debug!(len = payload.len(), "{}", constants::ERR_PAYLOAD_LENGTH);
                    Err(RobbusError::PayloadTooLong(payload.len()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Logical field bytes following the marker, checksum excluded
    pub fn logical_fields(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let fields = match self {
            OutgoingPacket::AliasAssign { alias, address } => {
                let mut fields = Vec::with_capacity(1 + DEVICE_ADDRESS_LEN);
                fields.push(*alias);
                fields.extend_from_slice(address);
                fields
            }
            OutgoingPacket::UnicastData { alias, payload } => {
                let mut fields = Vec::with_capacity(2 + payload.len());
                fields.push(*alias);
                fields.push(payload.len() as u8);
                fields.extend_from_slice(payload);
                fields
            }
            OutgoingPacket::GroupData {
                alias,
                mask,
                payload,
            } => {
                let mut fields = Vec::with_capacity(3 + payload.len());
                fields.push(*alias);
                fields.push(*mask);
                fields.push(payload.len() as u8);
                fields.extend_from_slice(payload);
                fields
            }
        };
        Ok(fields)
    }

    /// Encode into `out`, returning the number of wire bytes written.
    ///
    /// Preconditions are checked first; on error nothing is written.
    pub fn encode_into<B: BufMut>(&self, out: &mut B) -> Result<usize> {
        let fields = self.logical_fields()?;

        out.put_u8(self.kind().marker());
        let mut written = 1;
        let mut checksum = Checksum::new();
        for &value in &fields {
            let field = encode_byte(value);
            field.write_to(out);
            written += field.len();
            checksum = checksum.add(value);
        }

        let trailer = encode_byte(checksum.finalize());
        trailer.write_to(out);
        written += trailer.len();

        Ok(written)
    }

    /// Encode to a freshly allocated frame
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(self.max_encoded_len());
        self.encode_into(&mut frame)?;
        Ok(frame)
    }

    /// Exact frame size on the wire
    pub fn encoded_len(&self) -> Result<usize> {
        let fields = self.logical_fields()?;
        let trailer = Checksum::new().extend(&fields).finalize();
        let escaped: usize = fields
            .iter()
            .chain(std::iter::once(&trailer))
            .map(|&value| encode_byte(value).len())
            .sum();
        Ok(1 + escaped)
    }

    /// Upper bound on the frame size (every field escaped)
    pub fn max_encoded_len(&self) -> usize {
        let fields = match self {
            OutgoingPacket::AliasAssign { .. } => 1 + DEVICE_ADDRESS_LEN,
            OutgoingPacket::UnicastData { payload, .. } => 2 + payload.len(),
            OutgoingPacket::GroupData { payload, .. } => 3 + payload.len(),
        };
        1 + 2 * (fields + 1)
    }
}
