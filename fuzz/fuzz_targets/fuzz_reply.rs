#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use robbus::core::reply::{AliasReply, ReplyPacket, MAX_ALIAS_REPLY_WIRE_LEN};
use robbus::device::{BusDevice, EchoHandler};
use robbus::transport::mock::MockTransport;

fuzz_target!(|data: &[u8]| {
    // Incremental decode must never claim more bytes than it was given
    if let Ok(Some((reply, used))) = ReplyPacket::decode_wire(data) {
        assert!(used <= data.len());
        assert!(used <= 2 + 2 * (usize::from(reply.declared_length) + 2));
    }

    if let Ok(Some((_, used))) = AliasReply::decode_wire(data) {
        assert!(used <= data.len().min(MAX_ALIAS_REPLY_WIRE_LEN));
    }

    // Blocking decode over the same bytes must stop at the frame boundary
    let mut transport = MockTransport::with_incoming(data);
    if let Ok(reply) = ReplyPacket::read_from(&mut transport, Duration::ZERO) {
        let consumed = data.len() - transport.remaining();
        assert!(consumed <= 2 + 2 * (usize::from(reply.declared_length) + 2));
    }

    // Line noise must not panic a device
    let mut device = BusDevice::new(*b"FUZZ01", EchoHandler).with_alias(0x41);
    let _ = device.process(data);
});
