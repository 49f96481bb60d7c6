//! # RobBus
//!
//! Framing codec for the RobBus, a half-duplex multidrop serial bus where a
//! host exchanges short command/reply packets with addressed devices.
//!
//! ## Layers
//! - [`core`]: byte stuffing, checksum, request encoder, reply decoder, Tokio codec
//! - [`transport`]: the byte transport seam plus stream, mock, simulated-bus and async adapters
//! - [`master`]: blocking host side, one exchange at a time
//! - [`device`]: device-side receive state machine
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Quick Start
//! ```
//! use robbus::{OutgoingPacket, ReplyPacket};
//!
//! let frame = OutgoingPacket::unicast(b'r', vec![0x12]).to_bytes().unwrap();
//! assert_eq!(frame, [0x02, 0x72, 0x00, 0x05, 0x12, 0x7B]);
//!
//! let (reply, used) = ReplyPacket::decode_wire(&[0x02, 0xF2, 0x00, 0x05, 0x3F, 0xCE])
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(used, 6);
//! assert_eq!(reply.source_address, 0x72);
//! assert!(reply.checksum_valid);
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod master;
pub mod transport;
pub mod utils;

pub use crate::config::{BusConfig, LoggingConfig, TransportConfig};
pub use crate::core::codec::RobbusCodec;
pub use crate::core::packet::{DeviceAddress, OutgoingPacket, PacketKind};
pub use crate::core::reply::{AliasReply, Reply, ReplyPacket};
pub use crate::device::{BusDevice, CommandHandler};
pub use crate::error::{Result, RobbusError};
pub use crate::master::BusMaster;
pub use crate::transport::Transport;
