//! Async exchanges over `Framed<S, RobbusCodec>`.
//!
//! For hosts that already run on Tokio (a TCP serial bridge, an async serial
//! crate). Same half-duplex rule as the blocking path: one request, then at
//! most one reply, before the next request goes out.
//!
//! An exchange that fails leaves nothing behind: bytes already buffered from
//! the line and any echo still expected are dropped, so a late or partial
//! reply cannot be taken as the answer to the next request.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::config::TransportConfig;
use crate::core::codec::RobbusCodec;
use crate::core::packet::OutgoingPacket;
use crate::core::reply::Reply;
use crate::error::{Result, RobbusError};
use crate::utils::metrics::global_metrics;

pub struct AsyncBusLink<S> {
    framed: Framed<S, RobbusCodec>,
    reply_timeout: Duration,
}

impl<S> AsyncBusLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream`, skipping the request echo when `config.consume_echo` is set.
    ///
    /// The whole reply must arrive within `config.read_timeout`.
    pub fn new(stream: S, config: &TransportConfig) -> Self {
        let codec = if config.consume_echo {
            RobbusCodec::with_echo_skip()
        } else {
            RobbusCodec::new()
        };
        Self {
            framed: Framed::new(stream, codec),
            reply_timeout: config.read_timeout,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    /// Send one request and wait for its reply (`None` for group packets)
    #[instrument(skip(self, packet), fields(kind = packet.kind().name(), alias = packet.alias()))]
    pub async fn exchange(&mut self, packet: OutgoingPacket) -> Result<Option<Reply>> {
        let metrics = global_metrics();
        let stale = self.framed.read_buffer().len();
        if stale > 0 && self.framed.codec().pending_echo() == 0 {
            debug!(stale, "Dropping unsolicited bytes before request");
            self.framed.read_buffer_mut().clear();
        }

        let expects_reply = packet.expects_reply();
        let frame_len = match packet.encoded_len() {
            Ok(len) => len,
            Err(e) => {
                metrics.record_error(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.framed.send(packet).await {
            metrics.record_error(&e);
            return Err(e);
        }
        metrics.frame_sent(frame_len as u64);

        if !expects_reply {
            debug!("Group packet sent, no reply expected");
            return Ok(None);
        }

        let outcome = match tokio::time::timeout(self.reply_timeout, self.framed.next()).await {
            Err(_) => Err(RobbusError::TransportTimeout),
            Ok(None) => Err(RobbusError::ConnectionClosed),
            Ok(Some(result)) => result,
        };

        match outcome {
            Ok(reply) => {
                metrics.record_reply(&reply);
                Ok(Some(reply))
            }
            Err(e) => {
                metrics.record_error(&e);
                self.abandon();
                Err(e)
            }
        }
    }

    fn abandon(&mut self) {
        let buffered = self.framed.read_buffer().len();
        let echo = self.framed.codec().pending_echo();
        if buffered > 0 || echo > 0 {
            warn!(buffered, echo, "Discarding partial reply after failed exchange");
        }
        self.framed.read_buffer_mut().clear();
        self.framed.codec_mut().reset();
    }
}
