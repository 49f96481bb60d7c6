//! # Core Protocol Components
//!
//! Wire-level codec for the RobBus: byte stuffing, the additive checksum,
//! request framing and reply parsing.
//!
//! ## Components
//! - **Escape**: byte stuffing of field values `0x00..=0x03`
//! - **Checksum**: modulo-256 sum closed by a trailing byte
//! - **Packet**: the three request kinds and their frame encoder
//! - **Reply**: reply frame decoder and validation result
//! - **Codec**: Tokio codec for framing over async byte streams
//!
//! ## Wire Format
//! ```text
//! request: [Marker(1)] [Fields(N, escaped)] [Checksum(1, escaped)]
//! reply:   [Head(1)] [Alias|0x80(1)] [Length(1, esc)] [Payload(len, esc)] [Checksum(1, esc)]
//! ```
//!
//! Apart from the codec's pending echo, nothing is retained between frames.

pub mod checksum;
pub mod codec;
pub mod escape;
pub mod packet;
pub mod reply;
