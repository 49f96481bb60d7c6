//! Bus Metrics
//!
//! Counters for frames sent, replies received and the ways an exchange can
//! go wrong. Both the blocking [`BusMaster`](crate::master::BusMaster) and the
//! async [`AsyncBusLink`](crate::transport::framed::AsyncBusLink) feed the
//! global instance.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::core::reply::{AliasReply, Reply, ReplyPacket};
use crate::error::RobbusError;

/// Metrics collector for bus exchanges
#[derive(Debug)]
pub struct Metrics {
    /// Request frames written to the line
    pub frames_sent: AtomicU64,
    /// Wire bytes written, escapes included
    pub bytes_sent: AtomicU64,
    /// Replies decoded (valid or not)
    pub replies_received: AtomicU64,
    /// Logical payload bytes carried by decoded replies
    pub bytes_received: AtomicU64,
    /// Replies whose checksum did not close to zero
    pub checksum_failures: AtomicU64,
    /// Replies whose declared length disagreed with the bytes read
    pub length_mismatches: AtomicU64,
    /// Exchanges that ran out of time
    pub timeouts: AtomicU64,
    /// Broken escape sequences
    pub framing_errors: AtomicU64,
    /// Packets rejected before anything was written
    pub precondition_errors: AtomicU64,
    /// I/O failures and closed transports
    pub io_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            replies_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            length_mismatches: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            precondition_errors: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request frame of `byte_count` wire bytes
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a decoded reply, including its validation outcome
    pub fn reply_received(&self, reply: &ReplyPacket) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(reply.payload.len() as u64, Ordering::Relaxed);
        if !reply.checksum_valid {
            self.checksum_failures.fetch_add(1, Ordering::Relaxed);
        }
        if reply.length_mismatch() {
            self.length_mismatches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an alias reply; its address is not counted as payload
    pub fn alias_reply_received(&self, reply: &AliasReply) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        if !reply.checksum_valid {
            self.checksum_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reply(&self, reply: &Reply) {
        match reply {
            Reply::Data(reply) => self.reply_received(reply),
            Reply::Alias(reply) => self.alias_reply_received(reply),
        }
    }

    /// Bucket an error into its counter
    pub fn record_error(&self, error: &RobbusError) {
        let counter = match error {
            RobbusError::TransportTimeout => &self.timeouts,
            RobbusError::FramingError => &self.framing_errors,
            RobbusError::Io(_) | RobbusError::ConnectionClosed => &self.io_errors,
            RobbusError::ChecksumInvalid { .. } => &self.checksum_failures,
            RobbusError::LengthMismatch { .. } => &self.length_mismatches,
            e if e.is_precondition() => &self.precondition_errors,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            length_mismatches: self.length_mismatches.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            precondition_errors: self.precondition_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_sent = snapshot.frames_sent,
            bytes_sent = snapshot.bytes_sent,
            replies_received = snapshot.replies_received,
            bytes_received = snapshot.bytes_received,
            checksum_failures = snapshot.checksum_failures,
            length_mismatches = snapshot.length_mismatches,
            timeouts = snapshot.timeouts,
            framing_errors = snapshot.framing_errors,
            precondition_errors = snapshot.precondition_errors,
            io_errors = snapshot.io_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Bus metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub replies_received: u64,
    pub bytes_received: u64,
    pub checksum_failures: u64,
    pub length_mismatches: u64,
    pub timeouts: u64,
    pub framing_errors: u64,
    pub precondition_errors: u64,
    pub io_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
