//! # Stream Codec
//!
//! `tokio_util` codec for driving the bus over any async byte stream with
//! `Framed`. Requests are encoded as [`OutgoingPacket`]s and replies come back as
//! [`Reply`]s, data or alias layout depending on the echoed marker.
//!
//! On a shared half-duplex line the host hears its own request before the
//! reply. With [`RobbusCodec::with_echo_skip`] the encoder remembers every frame
//! it wrote and the decoder drops that many bytes before looking for a reply.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::config::ESCAPE_PREFIX;
use crate::core::packet::OutgoingPacket;
use crate::core::reply::Reply;
use crate::error::RobbusError;

#[derive(Debug, Default)]
pub struct RobbusCodec {
    skip_echo: bool,
    pending_echo: BytesMut,
}

impl RobbusCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that discards the echo of each request it encodes
    pub fn with_echo_skip() -> Self {
        Self {
            skip_echo: true,
            pending_echo: BytesMut::new(),
        }
    }

    /// Bytes of our own requests still expected back from the line
    pub fn pending_echo(&self) -> usize {
        self.pending_echo.len()
    }

    /// Forget any echo still expected, after an exchange was abandoned
    pub fn reset(&mut self) {
        if !self.pending_echo.is_empty() {
            debug!(dropped = self.pending_echo.len(), "Discarding pending echo");
        }
        self.pending_echo.clear();
    }

    fn consume_echo(&mut self, src: &mut BytesMut) {
        let n = self.pending_echo.len().min(src.len());
        if n == 0 {
            return;
        }
        if src[..n] != self.pending_echo[..n] {
            warn!(
                expected = ?&self.pending_echo[..n],
                received = ?&src[..n],
                "Echo does not match the request sent"
            );
        }
        src.advance(n);
        self.pending_echo.advance(n);
    }
}

impl Encoder<OutgoingPacket> for RobbusCodec {
    type Error = RobbusError;

    fn encode(&mut self, item: OutgoingPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.max_encoded_len());
        let start = dst.len();
        let written = item.encode_into(dst)?;
        if self.skip_echo {
            self.pending_echo.extend_from_slice(&dst[start..]);
        }
        debug!(kind = item.kind().name(), alias = item.alias(), written, "Encoded frame");
        Ok(())
    }
}

impl Decoder for RobbusCodec {
    type Item = Reply;
    type Error = RobbusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.consume_echo(src);
        if !self.pending_echo.is_empty() {
            return Ok(None);
        }

        match Reply::decode_wire(src)? {
            Some((reply, used)) => {
                src.advance(used);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(reply) = self.decode(src)? {
            return Ok(Some(reply));
        }
        if src.is_empty() {
            return Ok(None);
        }
        if src.last() == Some(&ESCAPE_PREFIX) {
            Err(RobbusError::FramingError)
        } else {
            Err(RobbusError::ConnectionClosed)
        }
    }
}
