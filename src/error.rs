//! # Error Types
//!
//! Error handling for the RobBus codec and its transports.
//!
//! Transport-level failures (timeouts, broken escape sequences, I/O) abort the
//! current encode/decode call. Validation failures on a received reply
//! (checksum, length) are NOT raised here by default; they are carried as data on
//! [`ReplyPacket`](crate::core::reply::ReplyPacket) so callers decide whether to
//! discard or retry. [`ReplyPacket::validate`](crate::core::reply::ReplyPacket::validate)
//! turns them into the `ChecksumInvalid` / `LengthMismatch` variants below.
//!
//! ## Error Categories
//! - **Transport Errors**: I/O failures, timeouts, closed streams
//! - **Framing Errors**: escape prefix with no follow-up byte
//! - **Precondition Errors**: malformed outgoing packets, rejected before any write
//! - **Validation Errors**: checksum / length disagreements (opt-in)
//! - **Configuration Errors**: TOML/env loading and validation
//!
//! ## Example Usage
//! ```rust
//! use robbus::core::packet::OutgoingPacket;
//! use robbus::error::{RobbusError, Result};
//!
//! fn frame(payload: &[u8]) -> Result<Vec<u8>> {
//!     OutgoingPacket::unicast(0x41, payload.to_vec()).to_bytes()
//! }
//!
//! assert!(frame(&[0x05]).is_ok());
//! assert!(matches!(frame(&[0u8; 300]), Err(RobbusError::PayloadTooLong(300))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_TRANSPORT_TIMEOUT: &str = "No byte received before the transport deadline";
    pub const ERR_CONNECTION_CLOSED: &str = "Transport closed";
    pub const ERR_FRAMING: &str = "Escape prefix not followed by a data byte";

    /// Precondition errors
    pub const ERR_ADDRESS_LENGTH: &str = "Device address must be exactly 6 bytes";
    pub const ERR_PAYLOAD_LENGTH: &str = "Payload exceeds 255 bytes";

    /// Configuration errors
    pub const ERR_CONFIG_OPEN: &str = "Failed to open config file";
    pub const ERR_CONFIG_PARSE: &str = "Failed to parse TOML";
}

// RobbusError is the primary error type for all bus operations
#[derive(Error, Debug)]
pub enum RobbusError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport timeout")]
    TransportTimeout,

    #[error("Transport closed")]
    ConnectionClosed,

    #[error("Framing error: escape prefix not followed by a data byte")]
    FramingError,

    #[error("Invalid device address length: {0} bytes (expected 6)")]
    InvalidAddressLength(usize),

    #[error("Payload too long: {0} bytes (maximum 255)")]
    PayloadTooLong(usize),

    #[error("Invalid packet marker: 0x{0:02X}")]
    InvalidMarker(u8),

    #[error("Checksum invalid: residual sum 0x{sum:02X}")]
    ChecksumInvalid { sum: u8 },

    #[error("Length mismatch: declared {declared}, received {actual}")]
    LengthMismatch { declared: u8, actual: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RobbusError {
    /// True for the errors that end an exchange because the transport gave up
    /// (as opposed to a caller mistake or a validation result).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RobbusError::Io(_)
                | RobbusError::TransportTimeout
                | RobbusError::ConnectionClosed
                | RobbusError::FramingError
        )
    }

    /// True for precondition violations detected before any byte was written.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RobbusError::InvalidAddressLength(_)
                | RobbusError::PayloadTooLong(_)
                | RobbusError::InvalidMarker(_)
        )
    }
}

/// Type alias for Results using RobbusError
pub type Result<T> = std::result::Result<T, RobbusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RobbusError::TransportTimeout.is_transport());
        assert!(RobbusError::FramingError.is_transport());
        assert!(!RobbusError::PayloadTooLong(256).is_transport());
        assert!(RobbusError::InvalidAddressLength(5).is_precondition());
        assert!(!RobbusError::ChecksumInvalid { sum: 1 }.is_precondition());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            RobbusError::InvalidMarker(0x7E).to_string(),
            "Invalid packet marker: 0x7E"
        );
        assert_eq!(
            RobbusError::LengthMismatch {
                declared: 5,
                actual: 1
            }
            .to_string(),
            "Length mismatch: declared 5, received 1"
        );
    }
}
