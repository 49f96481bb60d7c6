//! End-to-end exchanges: BusMaster against simulated devices

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use robbus::config::{TransportConfig, NO_ALIAS};
use robbus::core::packet::OutgoingPacket;
use robbus::device::{BusDevice, EchoHandler};
use robbus::error::RobbusError;
use robbus::master::BusMaster;
use robbus::transport::bus::SimulatedBus;
use robbus::transport::stream::StreamTransport;
use robbus::utils::metrics::global_metrics;

const KRETE1: [u8; 6] = *b"KRETE1";
const KRETE2: [u8; 6] = *b"KRETE2";

fn fast_config() -> TransportConfig {
    TransportConfig {
        read_timeout: Duration::from_millis(50),
        verify_echo: true,
        ..TransportConfig::default()
    }
}

#[test]
fn test_loadtest_sequence() {
    // the load-test tool: assign 'r', then repeatedly send 0x12
    let device = BusDevice::new(KRETE1, |_: &[u8]| vec![0x3F]);
    let bus = SimulatedBus::new().with_device(device);
    let mut master = BusMaster::new(bus, fast_config());

    let assigned = master.assign_alias(KRETE1, b'r').unwrap();
    assert_eq!(assigned.alias, b'r');
    assert_eq!(assigned.address, KRETE1);
    assert!(assigned.checksum_valid);

    for _ in 0..20 {
        let reply = master.send(b'r', &[0x12]).unwrap();
        assert_eq!(reply.header, [0x02, 0xF2]);
        assert_eq!(reply.payload, vec![0x3F]);
        assert!(reply.validate().is_ok());
    }
    assert_eq!(master.transport().pending(), 0);
}

#[test]
fn test_two_devices_addressed_separately() {
    let bus = SimulatedBus::new()
        .with_device(BusDevice::new(KRETE1, |_: &[u8]| vec![0x01]))
        .with_device(BusDevice::new(KRETE2, |_: &[u8]| vec![0x02]));
    let mut master = BusMaster::new(bus, fast_config());

    master.assign_alias(KRETE1, 0x10).unwrap();
    master.assign_alias(KRETE2, 0x20).unwrap();

    assert_eq!(master.send(0x10, &[]).unwrap().payload, vec![0x01]);
    assert_eq!(master.send(0x20, &[]).unwrap().payload, vec![0x02]);
    assert_eq!(master.transport().device(0).unwrap().alias(), 0x10);
    assert_eq!(master.transport().device(1).unwrap().alias(), 0x20);
}

#[test]
fn test_unknown_alias_times_out() {
    let bus = SimulatedBus::new().with_device(BusDevice::new(KRETE1, EchoHandler).with_alias(0x10));
    let mut master = BusMaster::new(bus, fast_config());

    let err = master.send(0x11, &[0x55]).unwrap_err();
    assert!(matches!(err, RobbusError::TransportTimeout));

    // the bus stays usable for the next exchange
    let reply = master.send(0x10, &[0x55]).unwrap();
    assert_eq!(reply.payload, vec![0x55]);
}

#[test]
fn test_release_alias_silences_device() {
    let bus = SimulatedBus::new().with_device(BusDevice::new(KRETE1, EchoHandler));
    let mut master = BusMaster::new(bus, fast_config());

    master.assign_alias(KRETE1, 0x30).unwrap();
    assert!(master.send(0x30, &[1]).is_ok());

    let released = master.release_alias(KRETE1).unwrap();
    assert_eq!(released.alias, 0x7F);
    assert_eq!(master.transport().device(0).unwrap().alias(), NO_ALIAS);
    assert!(matches!(
        master.send(0x30, &[1]),
        Err(RobbusError::TransportTimeout)
    ));
}

#[test]
fn test_group_reaches_matching_devices_only() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let device = |address: [u8; 6], alias: u8| {
        let hits = Arc::clone(&hits);
        BusDevice::new(address, move |req: &[u8]| {
            hits.lock().unwrap().push((alias, req.to_vec()));
            vec![0xEE]
        })
        .with_alias(alias)
    };
    let bus = SimulatedBus::new()
        .with_device(device(*b"DEV001", 0x21))
        .with_device(device(*b"DEV002", 0x22))
        .with_device(device(*b"DEV003", 0x31));
    let mut master = BusMaster::new(bus, fast_config());

    master.send_group(0x20, 0xF0, &[0x42]).unwrap();
    assert_eq!(master.transport().pending(), 0, "group packets get no reply");

    let mut seen = hits.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![(0x21, vec![0x42]), (0x22, vec![0x42])]);
}

#[test]
fn test_escaped_fields_end_to_end() {
    let bus = SimulatedBus::new().with_device(BusDevice::new(KRETE1, EchoHandler));
    let mut master = BusMaster::new(bus, fast_config());

    master.assign_alias(KRETE1, 0x03).unwrap();
    let reply = master.send(0x03, &[0x00, 0x01, 0x02, 0x03]).unwrap();
    assert_eq!(reply.source_address, 0x03);
    assert_eq!(reply.payload, vec![0x00, 0x01, 0x02, 0x03]);
    assert!(reply.checksum_valid);
}

#[test]
fn test_point_to_point_link_without_echo() {
    let bus = SimulatedBus::new()
        .without_echo()
        .with_device(BusDevice::new(KRETE1, EchoHandler).with_alias(0x44));
    let config = TransportConfig {
        consume_echo: false,
        ..fast_config()
    };
    assert!(config.validate().is_empty());
    let mut master = BusMaster::new(bus, config);

    assert_eq!(master.send(0x44, &[9]).unwrap().payload, vec![9]);
}

#[test]
fn test_exchange_updates_metrics() {
    let before = global_metrics().snapshot();

    let bus = SimulatedBus::new().with_device(BusDevice::new(KRETE1, EchoHandler).with_alias(0x44));
    let mut master = BusMaster::new(bus, fast_config());
    master.send(0x44, &[1, 2]).unwrap();
    let _ = master.send(0x45, &[1]);
    let _ = master.exchange(&OutgoingPacket::unicast(0x44, vec![0; 300]));

    let after = global_metrics().snapshot();
    assert!(after.frames_sent >= before.frames_sent + 2);
    assert!(after.replies_received > before.replies_received);
    assert!(after.timeouts > before.timeouts);
    assert!(after.precondition_errors > before.precondition_errors);
}

#[test]
fn test_device_behind_tcp_bridge() {
    // a serial-over-TCP bridge with one device on the far side, echo included
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let bridge = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut device = BusDevice::new(KRETE1, |_: &[u8]| vec![0x3F]).with_alias(b'r');
        let mut buf = [0u8; 64];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let mut out = buf[..n].to_vec();
            out.extend(device.process(&buf[..n]));
            if stream.write_all(&out).is_err() {
                break;
            }
        }
    });

    let stream = TcpStream::connect(addr).expect("connect");
    let mut master = BusMaster::new(StreamTransport::new(stream), fast_config());
    for _ in 0..5 {
        let reply = master.send(b'r', &[0x12]).unwrap();
        assert_eq!(reply.payload, vec![0x3F]);
        assert!(reply.checksum_valid);
    }

    drop(master);
    bridge.join().expect("bridge thread");
}

#[test]
fn test_alias_reply_checksum_on_marker_value() {
    // address bytes sum to 0xFF, so the raw checksum on the line is 0x01
    let odd: [u8; 6] = [0x4B, 0x52, 0x45, 0x54, 0x45, 0x84];
    let bus = SimulatedBus::new()
        .with_device(BusDevice::new(odd, EchoHandler))
        .with_device(BusDevice::new(KRETE2, EchoHandler).with_alias(0x20));
    let mut master = BusMaster::new(bus, fast_config());

    let assigned = master.assign_alias(odd, 0x10).unwrap();
    assert_eq!(assigned.checksum, 0x01);
    assert!(assigned.checksum_valid);
    assert_eq!(master.transport().pending(), 0);

    assert_eq!(master.send(0x20, &[5]).unwrap().payload, vec![5]);
    assert_eq!(master.send(0x10, &[6]).unwrap().payload, vec![6]);
}
