//! # Reply Frames
//!
//! A device answers with a frame that carries no marker of its own:
//!
//! ```text
//! [head] [alias|0x80] length payload[length] checksum
//!  raw    raw         escaped fields ...............
//! ```
//!
//! The two header bytes are read raw. The checksum covers everything after the
//! first header byte, so the reply address, length, payload and checksum byte
//! must sum to zero modulo 256. The source alias is the second header byte
//! minus `0x80`.
//!
//! An alias assignment is answered differently. There is no length byte and
//! only the six address bytes are checksummed:
//!
//! ```text
//! 0x01 [alias|0x80] address[6] checksum
//! raw   raw         escaped    raw
//! ```
//!
//! Checksum and length problems are reported on the returned reply, not as
//! errors; only transport failures abort decoding.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::{
    ALIAS_PACKET_HEAD, DEVICE_ADDRESS_LEN, MAX_PAYLOAD_LEN, REPLY_ADDRESS_OFFSET,
    UNICAST_PACKET_HEAD,
};
use crate::core::checksum::Checksum;
use crate::core::escape::{decode_byte, encode_byte, peek_byte};
use crate::core::packet::DeviceAddress;
use crate::error::{Result, RobbusError};
use crate::transport::Transport;

/// Raw header bytes preceding the escaped part of a reply
pub const REPLY_HEADER_LEN: usize = 2;

/// Smallest logical reply: header, length and checksum
pub const MIN_REPLY_LEN: usize = REPLY_HEADER_LEN + 2;

/// Longest alias reply on the wire: header, six escaped address fields, raw checksum
pub const MAX_ALIAS_REPLY_WIRE_LEN: usize = REPLY_HEADER_LEN + 2 * DEVICE_ADDRESS_LEN + 1;

/// A decoded reply from one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    /// Raw header as received (echoed marker, reply-flagged alias)
    pub header: [u8; REPLY_HEADER_LEN],
    /// Alias of the answering device
    pub source_address: u8,
    /// Length announced by the device
    pub declared_length: u8,
    /// Payload bytes actually received
    pub payload: Vec<u8>,
    /// Trailing checksum byte as received
    pub checksum: u8,
    /// Whether the checksum closed the frame sum to zero
    pub checksum_valid: bool,
    residual: u8,
}

impl ReplyPacket {
    /// Read exactly one reply frame from `transport`.
    ///
    /// Never reads past `header + length + declared_length payload fields + checksum`.
    pub fn read_from<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<Self> {
        let mut logical = Vec::with_capacity(MIN_REPLY_LEN + 8);

        for _ in 0..REPLY_HEADER_LEN {
            let byte = transport.read_byte(timeout)?;
            trace!(byte, "reply header byte");
            logical.push(byte);
        }

        let declared = decode_byte(|| transport.read_byte(timeout))?;
        logical.push(declared);

        for _ in 0..declared {
            logical.push(decode_byte(|| transport.read_byte(timeout))?);
        }

        logical.push(decode_byte(|| transport.read_byte(timeout))?);

        Self::from_logical(&logical)
    }

    /// Decode one reply frame from the front of `buf`.
    ///
    /// Returns the reply and the number of wire bytes it occupied, or `Ok(None)`
    /// if `buf` does not yet hold a complete frame.
    pub fn decode_wire(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < REPLY_HEADER_LEN {
            return Ok(None);
        }

        let mut logical = Vec::with_capacity(MIN_REPLY_LEN + 8);
        logical.extend_from_slice(&buf[..REPLY_HEADER_LEN]);
        let mut pos = REPLY_HEADER_LEN;

        let Some((declared, used)) = peek_byte(&buf[pos..]) else {
            return Ok(None);
        };
        logical.push(declared);
        pos += used;

        // payload fields plus the checksum field
        for _ in 0..=declared {
            let Some((value, used)) = peek_byte(&buf[pos..]) else {
                return Ok(None);
            };
            logical.push(value);
            pos += used;
        }

        Ok(Some((Self::from_logical(&logical)?, pos)))
    }

    /// Wire bytes of the reply a device with `alias` sends to a unicast request.
    pub fn encode_wire(alias: u8, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RobbusError::PayloadTooLong(payload.len()));
        }

        let source = alias | REPLY_ADDRESS_OFFSET;
        let mut wire = Vec::with_capacity(REPLY_HEADER_LEN + 2 * (payload.len() + 2));
        wire.push(UNICAST_PACKET_HEAD);
        wire.push(source);

        let mut checksum = Checksum::new().add(source);
        let length = payload.len() as u8;
        encode_byte(length).write_to(&mut wire);
        checksum = checksum.add(length);
        for &value in payload {
            encode_byte(value).write_to(&mut wire);
            checksum = checksum.add(value);
        }
        encode_byte(checksum.finalize()).write_to(&mut wire);

        Ok(wire)
    }

    /// Interpret an already unescaped reply byte sequence.
    ///
    /// `logical` is `header[2] ++ length ++ payload ++ checksum`. The payload is
    /// everything between the length and the last byte, whatever the declared
    /// length says.
    pub fn from_logical(logical: &[u8]) -> Result<Self> {
        if logical.len() < MIN_REPLY_LEN {
            return Err(RobbusError::FramingError);
        }

        let header = [logical[0], logical[1]];
        // the echoed marker is not part of the checksum
        let checked = &logical[1..];
        let sum = Checksum::new().extend(checked);

        let reply = Self {
            header,
            source_address: checked[0].wrapping_sub(REPLY_ADDRESS_OFFSET),
            declared_length: checked[1],
            payload: checked[2..checked.len() - 1].to_vec(),
            checksum: checked[checked.len() - 1],
            checksum_valid: sum.verify(),
            residual: sum.residual(),
        };

        if !reply.checksum_valid {
            warn!(
                source = reply.source_address,
                residual = reply.residual,
                "Reply checksum invalid"
            );
        }
        if reply.length_mismatch() {
            warn!(
                source = reply.source_address,
                declared = reply.declared_length,
                actual = reply.payload.len(),
                "Reply length does not match payload"
            );
        }
        debug!(
            source = reply.source_address,
            length = reply.payload.len(),
            valid = reply.checksum_valid,
            "Decoded reply"
        );

        Ok(reply)
    }

    /// True when the declared length disagrees with the payload received
    pub fn length_mismatch(&self) -> bool {
        self.payload.len() != usize::from(self.declared_length)
    }

    /// `sum mod 256` over the checked bytes; zero for a valid reply
    pub fn residual(&self) -> u8 {
        self.residual
    }

    /// Turn soft validation failures into errors
    pub fn validate(&self) -> Result<()> {
        if !self.checksum_valid {
            return Err(RobbusError::ChecksumInvalid { sum: self.residual });
        }
        if self.length_mismatch() {
            return Err(RobbusError::LengthMismatch {
                declared: self.declared_length,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    /// Consume the reply, keeping the payload only if it validated
    pub fn into_payload(self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(self.payload)
    }
}

/// A device's answer to an alias assignment or release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasReply {
    /// Raw header as received (`0x01`, reply-flagged alias)
    pub header: [u8; REPLY_HEADER_LEN],
    /// Alias the device now answers to; `0x7F` after a release
    pub alias: u8,
    /// Full address of the device that took the alias
    pub address: DeviceAddress,
    /// Trailing checksum byte as received
    pub checksum: u8,
    /// Whether the checksum closed the address sum to zero
    pub checksum_valid: bool,
    residual: u8,
}

impl AliasReply {
    /// Read exactly one alias reply from `transport`.
    pub fn read_from<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<Self> {
        let header = [transport.read_byte(timeout)?, transport.read_byte(timeout)?];
        let mut address = [0u8; DEVICE_ADDRESS_LEN];
        for slot in address.iter_mut() {
            *slot = decode_byte(|| transport.read_byte(timeout))?;
        }
        let checksum = transport.read_byte(timeout)?;

        Ok(Self::from_parts(header, address, checksum))
    }

    /// Decode one alias reply from the front of `buf`, like [`ReplyPacket::decode_wire`].
    pub fn decode_wire(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < REPLY_HEADER_LEN {
            return Ok(None);
        }

        let header = [buf[0], buf[1]];
        let mut pos = REPLY_HEADER_LEN;
        let mut address = [0u8; DEVICE_ADDRESS_LEN];
        for slot in address.iter_mut() {
            let Some((value, used)) = peek_byte(&buf[pos..]) else {
                return Ok(None);
            };
            *slot = value;
            pos += used;
        }
        let Some(&checksum) = buf.get(pos) else {
            return Ok(None);
        };

        Ok(Some((Self::from_parts(header, address, checksum), pos + 1)))
    }

    /// Wire bytes a device at `address` sends after taking `alias`.
    pub fn encode_wire(alias: u8, address: &DeviceAddress) -> Vec<u8> {
        let mut wire = Vec::with_capacity(MAX_ALIAS_REPLY_WIRE_LEN);
        wire.push(ALIAS_PACKET_HEAD);
        wire.push(alias | REPLY_ADDRESS_OFFSET);
        for &value in address {
            encode_byte(value).write_to(&mut wire);
        }
        wire.push(Checksum::new().extend(address).finalize());
        wire
    }

    fn from_parts(header: [u8; REPLY_HEADER_LEN], address: DeviceAddress, checksum: u8) -> Self {
        let sum = Checksum::new().extend(&address).add(checksum);
        let reply = Self {
            header,
            alias: header[1].wrapping_sub(REPLY_ADDRESS_OFFSET),
            address,
            checksum,
            checksum_valid: sum.verify(),
            residual: sum.residual(),
        };

        if !reply.checksum_valid {
            warn!(
                alias = reply.alias,
                residual = reply.residual,
                "Alias reply checksum invalid"
            );
        }
        debug!(alias = reply.alias, address = ?reply.address, "Decoded alias reply");
        reply
    }

    pub fn residual(&self) -> u8 {
        self.residual
    }

    pub fn validate(&self) -> Result<()> {
        if self.checksum_valid {
            Ok(())
        } else {
            Err(RobbusError::ChecksumInvalid { sum: self.residual })
        }
    }
}

/// Either kind of reply, told apart by the echoed marker in the first header byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Data(ReplyPacket),
    Alias(AliasReply),
}

impl Reply {
    /// Decode whichever reply sits at the front of `buf`.
    pub fn decode_wire(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        match buf.first() {
            None => Ok(None),
            Some(&ALIAS_PACKET_HEAD) => {
                Ok(AliasReply::decode_wire(buf)?.map(|(r, used)| (Reply::Alias(r), used)))
            }
            Some(_) => Ok(ReplyPacket::decode_wire(buf)?.map(|(r, used)| (Reply::Data(r), used))),
        }
    }

    /// Alias of the answering device
    pub fn source_address(&self) -> u8 {
        match self {
            Reply::Data(reply) => reply.source_address,
            Reply::Alias(reply) => reply.alias,
        }
    }

    pub fn checksum_valid(&self) -> bool {
        match self {
            Reply::Data(reply) => reply.checksum_valid,
            Reply::Alias(reply) => reply.checksum_valid,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Reply::Data(reply) => reply.validate(),
            Reply::Alias(reply) => reply.validate(),
        }
    }

    pub fn into_data(self) -> Option<ReplyPacket> {
        match self {
            Reply::Data(reply) => Some(reply),
            Reply::Alias(_) => None,
        }
    }

    pub fn into_alias(self) -> Option<AliasReply> {
        match self {
            Reply::Alias(reply) => Some(reply),
            Reply::Data(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_reference_reply() {
        let mut transport = MockTransport::with_incoming(&[0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE]);
        let reply = ReplyPacket::read_from(&mut transport, TIMEOUT).unwrap();
        assert_eq!(reply.header, [0x02, 0xF2]);
        assert_eq!(reply.source_address, 0x72);
        assert_eq!(reply.declared_length, 1);
        assert_eq!(reply.payload, vec![0x3F]);
        assert_eq!(reply.checksum, 0xCE);
        assert!(reply.checksum_valid);
        assert!(!reply.length_mismatch());
        assert!(reply.validate().is_ok());
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn test_mixed_vector_stops_at_frame_boundary() {
        let mut transport = MockTransport::with_incoming(&[
            0x02, 0xF2, 0x00, 0x05, 0x12, 0x7B, 0x00, 0x43, 0xCE,
        ]);
        let reply = ReplyPacket::read_from(&mut transport, TIMEOUT).unwrap();
        assert_eq!(reply.source_address, 0x72);
        assert_eq!(reply.declared_length, 1);
        assert_eq!(reply.payload, vec![0x12]);
        assert_eq!(reply.checksum, 0x7B);
        assert!(!reply.checksum_valid);
        assert_eq!(reply.residual(), 0x80);
        assert!(matches!(
            reply.validate(),
            Err(RobbusError::ChecksumInvalid { sum: 0x80 })
        ));
        assert_eq!(transport.remaining(), 3);
    }

    #[test]
    fn test_short_read_is_timeout() {
        let mut transport = MockTransport::with_incoming(&[0x02, 0xF2, 0x03]);
        assert!(matches!(
            ReplyPacket::read_from(&mut transport, TIMEOUT),
            Err(RobbusError::TransportTimeout)
        ));
    }

    #[test]
    fn test_dangling_escape_is_framing_error() {
        let mut transport = MockTransport::with_incoming(&[0x02, 0xF2, 0x00, 0x05, 0x00]);
        assert!(matches!(
            ReplyPacket::read_from(&mut transport, TIMEOUT),
            Err(RobbusError::FramingError)
        ));
    }

    #[test]
    fn test_length_mismatch_is_soft() {
        // declared 3, two payload bytes before the checksum
        let logical = [0x02, 0xF2, 0x03, 0x10, 0x20, 0x00];
        let reply = ReplyPacket::from_logical(&logical).unwrap();
        assert!(reply.length_mismatch());
        assert_eq!(reply.payload, vec![0x10, 0x20]);
        assert!(matches!(
            reply.validate(),
            Err(RobbusError::ChecksumInvalid { .. }) | Err(RobbusError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_length_mismatch_with_valid_checksum() {
        let mut logical = vec![0x02, 0xF2, 0x03, 0x10, 0x20];
        let check = Checksum::new().extend(&logical[1..]).finalize();
        logical.push(check);
        let reply = ReplyPacket::from_logical(&logical).unwrap();
        assert!(reply.checksum_valid);
        assert!(matches!(
            reply.into_payload(),
            Err(RobbusError::LengthMismatch {
                declared: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_encode_wire_matches_reference_reply() {
        let wire = ReplyPacket::encode_wire(b'r', &[0x3F]).unwrap();
        assert_eq!(wire, vec![0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE]);
        assert!(ReplyPacket::encode_wire(1, &[0; 256]).is_err());
    }

    #[test]
    fn test_too_short_logical_rejected() {
        assert!(ReplyPacket::from_logical(&[0x02, 0xF2, 0x00]).is_err());
    }

    #[test]
    fn test_decode_wire_incremental() {
        let wire = [0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE, 0xAA];
        for end in 0..6 {
            assert!(ReplyPacket::decode_wire(&wire[..end]).unwrap().is_none());
        }
        let (reply, used) = ReplyPacket::decode_wire(&wire).unwrap().unwrap();
        assert_eq!(used, 6);
        assert_eq!(reply.payload, vec![0x3F]);
        assert!(reply.checksum_valid);
    }

    #[test]
    fn test_escaped_payload_and_checksum() {
        // length, first payload byte and checksum all need escaping
        let source = 0xF2u8;
        let mut logical = vec![0x02, source, 0x02, 0x01];
        let partial = Checksum::new().extend(&logical[1..]).sum();
        // pick the last payload byte so the checksum lands on 0x02
        let last = ((256 + 0x100 - 2 - (partial % 256)) % 256) as u8;
        logical.push(last);
        let check = Checksum::new().extend(&logical[1..]).finalize();
        assert_eq!(check, 0x02);

        let wire = ReplyPacket::encode_wire(0x72, &[0x01, last]).unwrap();
        assert_eq!(&wire[..6], &[0x02, source, 0x00, 0x06, 0x00, 0x05]);
        assert_eq!(&wire[wire.len() - 2..], &[0x00, 0x06]);

        let mut transport = MockTransport::with_incoming(&wire);
        let reply = ReplyPacket::read_from(&mut transport, TIMEOUT).unwrap();
        assert_eq!(reply.payload, vec![0x01, last]);
        assert_eq!(reply.checksum, 0x02);
        assert!(reply.checksum_valid);
    }

    // KRETE1 taking alias 'r', bytes as the device firmware sends them
    const KRETE1_ALIAS_REPLY: [u8; 9] = [0x01, 0xF2, 0x4B, 0x52, 0x45, 0x54, 0x45, 0x31, 0x54];

    #[test]
    fn test_alias_reply_has_no_length_byte() {
        let mut transport = MockTransport::with_incoming(&KRETE1_ALIAS_REPLY);
        let reply = AliasReply::read_from(&mut transport, TIMEOUT).unwrap();
        assert_eq!(reply.header, [0x01, 0xF2]);
        assert_eq!(reply.alias, b'r');
        assert_eq!(&reply.address, b"KRETE1");
        assert_eq!(reply.checksum, 0x54);
        assert!(reply.checksum_valid);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn test_alias_reply_encoding_matches_device_bytes() {
        assert_eq!(AliasReply::encode_wire(b'r', b"KRETE1"), KRETE1_ALIAS_REPLY.to_vec());
    }

    #[test]
    fn test_alias_reply_escapes_address_only() {
        let address = [0x00, 0x01, 0x10, 0x20, 0x30, 0x40];
        let wire = AliasReply::encode_wire(0x7F, &address);
        assert_eq!(&wire[..6], &[0x01, 0xFF, 0x00, 0x04, 0x00, 0x05]);
        assert_eq!(wire.len(), 2 + 8 + 1);
        // 0x00 + 0x01 + 0x10 + 0x20 + 0x30 + 0x40 = 0xA1
        assert_eq!(wire[wire.len() - 1], 0x5F);

        let (reply, used) = AliasReply::decode_wire(&wire).unwrap().unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(reply.alias, 0x7F);
        assert_eq!(reply.address, address);
        assert!(reply.validate().is_ok());
    }

    #[test]
    fn test_alias_reply_bad_checksum_is_soft() {
        let mut wire = KRETE1_ALIAS_REPLY;
        wire[8] = 0x55;
        let (reply, _) = AliasReply::decode_wire(&wire).unwrap().unwrap();
        assert!(!reply.checksum_valid);
        assert!(matches!(
            reply.validate(),
            Err(RobbusError::ChecksumInvalid { sum: 0x01 })
        ));
    }

    #[test]
    fn test_alias_reply_incremental() {
        for end in 0..KRETE1_ALIAS_REPLY.len() {
            assert!(AliasReply::decode_wire(&KRETE1_ALIAS_REPLY[..end])
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_reply_dispatches_on_marker() {
        let (alias, used) = Reply::decode_wire(&KRETE1_ALIAS_REPLY).unwrap().unwrap();
        assert_eq!(used, 9);
        assert_eq!(alias.source_address(), b'r');
        assert!(alias.clone().into_data().is_none());
        assert_eq!(&alias.into_alias().unwrap().address, b"KRETE1");

        let (data, used) = Reply::decode_wire(&[0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE])
            .unwrap()
            .unwrap();
        assert_eq!(used, 6);
        assert!(data.checksum_valid());
        assert_eq!(data.into_data().unwrap().payload, vec![0x3F]);
        assert!(Reply::decode_wire(&[]).unwrap().is_none());
    }
}
