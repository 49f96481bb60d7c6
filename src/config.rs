//! # Configuration Management
//!
//! Wire constants and runtime configuration for a RobBus host.
//!
//! The wire constants are fixed by the devices on the bus and never change at
//! runtime. Everything that does vary between installations (serial device,
//! baud rate, read deadline, echo handling, logging) lives in [`BusConfig`].
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`

use crate::error::{constants, Result, RobbusError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Marker opening an alias assign/release packet
pub const ALIAS_PACKET_HEAD: u8 = 0x01;

/// Marker opening a unicast data packet
pub const UNICAST_PACKET_HEAD: u8 = 0x02;

/// Marker opening a group (masked) data packet
pub const GROUP_PACKET_HEAD: u8 = 0x03;

/// First byte of a two-byte escape sequence
pub const ESCAPE_PREFIX: u8 = 0x00;

/// Offset added to an escaped value on the wire
pub const ESCAPE_SHIFT: u8 = 0x04;

/// Largest value that must be escaped (values 0..=ESCAPE_MAX are reserved)
pub const ESCAPE_MAX: u8 = GROUP_PACKET_HEAD;

/// Added to the device alias when a device answers, so replies never look like requests
pub const REPLY_ADDRESS_OFFSET: u8 = 0x80;

/// Alias value that releases a previously assigned alias
pub const ALIAS_RELEASE: u8 = 0x7F;

/// Alias of a device that has not been assigned one
pub const NO_ALIAS: u8 = 0x00;

/// Length of a full device address
pub const DEVICE_ADDRESS_LEN: usize = 6;

/// Max payload carried by one packet (one-byte length field)
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Line speed used by every known RobBus device
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Per-byte read deadline of the stock host tools
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Baud rates accepted by `TransportConfig::validate`
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600,
];

/// Top-level configuration for a bus host
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BusConfig {
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BusConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            RobbusError::ConfigError(format!("{}: {e}", constants::ERR_CONFIG_OPEN))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RobbusError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content).map_err(|e| {
            RobbusError::ConfigError(format!("{}: {e}", constants::ERR_CONFIG_PARSE))
        })
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(device) = std::env::var("ROBBUS_DEVICE") {
            config.transport.device = device;
        }

        if let Ok(baud) = std::env::var("ROBBUS_BAUD_RATE") {
            config.transport.baud_rate = baud.parse::<u32>().map_err(|e| {
                RobbusError::ConfigError(format!("Invalid ROBBUS_BAUD_RATE '{baud}': {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("ROBBUS_READ_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                RobbusError::ConfigError(format!("Invalid ROBBUS_READ_TIMEOUT_MS '{timeout}': {e}"))
            })?;
            config.transport.read_timeout = Duration::from_millis(millis);
        }

        if let Ok(echo) = std::env::var("ROBBUS_CONSUME_ECHO") {
            config.transport.consume_echo = matches!(echo.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RobbusError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| RobbusError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RobbusError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Serial line configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Serial device path (e.g. "/dev/robbus")
    pub device: String,

    /// Line speed in baud
    pub baud_rate: u32,

    /// Deadline for each single-byte read
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,

    /// Read back our own request bytes before the reply (shared half-duplex line)
    pub consume_echo: bool,

    /// Compare the echoed bytes with what was sent and warn on mismatch
    #[serde(default)]
    pub verify_echo: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device: String::from("/dev/robbus"),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            consume_echo: true,
            verify_echo: false,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.device.is_empty() {
            errors.push("Serial device path cannot be empty".to_string());
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            errors.push(format!(
                "Unsupported baud rate: {} (supported: {:?})",
                self.baud_rate, SUPPORTED_BAUD_RATES
            ));
        }

        if self.read_timeout.is_zero() {
            errors.push("Read timeout cannot be 0".to_string());
        } else if self.read_timeout.as_secs() > 60 {
            errors.push("Read timeout too long (maximum: 60s)".to_string());
        }

        if self.verify_echo && !self.consume_echo {
            errors.push("verify_echo requires consume_echo to be enabled".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("robbus"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
