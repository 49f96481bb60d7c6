//! # Byte Stuffing
//!
//! Values `0x00..=0x03` are reserved on the wire: `0x00` opens an escape
//! sequence and `0x01..=0x03` are packet markers. A field byte in that range is
//! sent as `0x00, v + 4`; every other value goes out as-is.
//!
//! ```text
//! logical  wire
//! 0x02  -> 0x00 0x06
//! 0x41  -> 0x41
//! ```

use bytes::BufMut;
use tracing::trace;

use crate::config::{ESCAPE_MAX, ESCAPE_PREFIX, ESCAPE_SHIFT};
use crate::error::{constants, Result, RobbusError};

/// Wire encoding of a single logical byte (one or two bytes long)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapedField {
    bytes: [u8; 2],
    len: usize,
}

impl EscapedField {
    /// The wire bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of wire bytes (1 or 2)
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the value needed the escape prefix
    pub fn is_escaped(&self) -> bool {
        self.len == 2
    }

    /// Append the wire bytes to `out`
    pub fn write_to<B: BufMut>(&self, out: &mut B) {
        out.put_slice(self.as_slice());
    }
}

/// Whether `value` must be escaped when sent as a field byte
#[inline]
pub fn needs_escape(value: u8) -> bool {
    value <= ESCAPE_MAX
}

/// Encode one logical byte. Every value in `0..=255` is encodable.
#[inline]
pub fn encode_byte(value: u8) -> EscapedField {
    if needs_escape(value) {
        EscapedField {
            bytes: [ESCAPE_PREFIX, value + ESCAPE_SHIFT],
            len: 2,
        }
    } else {
        EscapedField {
            bytes: [value, 0],
            len: 1,
        }
    }
}

/// Decode one logical byte, pulling wire bytes from `read`.
///
/// A failure on the first read is returned unchanged. Once the escape prefix has
/// been seen, a missing follow-up byte is a [`RobbusError::FramingError`].
pub fn decode_byte<F>(mut read: F) -> Result<u8>
where
    F: FnMut() -> Result<u8>,
{
    let first = read()?;
    if first != ESCAPE_PREFIX {
        return Ok(first);
    }

    match read() {
        Ok(second) => Ok(second.wrapping_sub(ESCAPE_SHIFT)),
        Err(RobbusError::TransportTimeout) | Err(RobbusError::ConnectionClosed) => {
            trace!("{}", constants::ERR_FRAMING);
            Err(RobbusError::FramingError)
        }
        Err(e) => Err(e),
    }
}

/// Decode one logical byte from the front of `buf` without consuming it.
///
/// Returns the value and the number of wire bytes it occupied, or `None` when
/// `buf` ends in the middle of the field.
#[inline]
pub fn peek_byte(buf: &[u8]) -> Option<(u8, usize)> {
    match buf {
        [] => None,
        [ESCAPE_PREFIX] => None,
        [ESCAPE_PREFIX, second, ..] => Some((second.wrapping_sub(ESCAPE_SHIFT), 2)),
        [first, ..] => Some((*first, 1)),
    }
}
