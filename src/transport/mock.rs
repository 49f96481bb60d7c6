//! # Mock Transport
//!
//! Scripted in-memory transport for tests. Bytes queued with
//! [`MockTransport::push_incoming`] are handed out by `read_byte`; once the
//! queue runs dry every read times out immediately. Everything written is
//! captured for inspection.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Result, RobbusError};
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct MockTransport {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with `bytes` already waiting to be read
    pub fn with_incoming(bytes: &[u8]) -> Self {
        let mut mock = Self::new();
        mock.push_incoming(bytes);
        mock
    }

    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
    }

    /// Report `ConnectionClosed` instead of a timeout once the queue is empty
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Bytes still queued for reading
    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for MockTransport {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        if self.closed {
            return Err(RobbusError::ConnectionClosed);
        }
        self.written.push(byte);
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> Result<u8> {
        match self.incoming.pop_front() {
            Some(byte) => Ok(byte),
            None if self.closed => Err(RobbusError::ConnectionClosed),
            None => Err(RobbusError::TransportTimeout),
        }
    }
}
