//! # Utility Modules
//!
//! Ambient support shared by the blocking and async exchange paths.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe exchange counters

pub mod logging;
pub mod metrics;
