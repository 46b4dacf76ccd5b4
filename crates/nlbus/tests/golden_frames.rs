// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // Large test constants

//! Hand-assembled frames checked against the codec and parsers.
//!
//! Bytes are built field by field in host order, the way the kernel lays
//! them out, so layout regressions show up independently of the encoder.

use nlbus::attr;
use nlbus::monitor::rtnl::{self, IFA_ADDRESS, IFA_LABEL, IFA_LOCAL, IFLA_IFNAME};
use nlbus::monitor::{EventMonitor, NetworkEvent};
use nlbus::wire::msg_type;
use nlbus::{MessageCodec, NlError};

fn header(length: u32, kind: u16, flags: u16, seq: u32, pid: u32) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&length.to_ne_bytes());
    v.extend_from_slice(&kind.to_ne_bytes());
    v.extend_from_slice(&flags.to_ne_bytes());
    v.extend_from_slice(&seq.to_ne_bytes());
    v.extend_from_slice(&pid.to_ne_bytes());
    v
}

fn rta(kind: u16, value: &[u8]) -> Vec<u8> {
    let len = 4 + value.len();
    let mut v = Vec::new();
    v.extend_from_slice(&(len as u16).to_ne_bytes());
    v.extend_from_slice(&kind.to_ne_bytes());
    v.extend_from_slice(value);
    while v.len() % 4 != 0 {
        v.push(0);
    }
    v
}

#[test]
fn golden_done_frame() {
    let expected = header(16, msg_type::DONE, 0, 77, 0);
    assert_eq!(MessageCodec::default().encode_done(0, 77).unwrap(), expected);
}

#[test]
fn golden_text_frame_padding() {
    // "Hello" is 5 bytes: length 21, three bytes of padding.
    let mut expected = header(21, 0x11, 0, 1, 4242);
    expected.extend_from_slice(b"Hello\0\0\0");
    let codec = MessageCodec::default();
    assert_eq!(codec.encode(b"Hello", 4242, 0x11, 1).unwrap(), expected);
    assert_eq!(codec.decode(&expected).unwrap().payload, b"Hello");
}

#[test]
fn golden_rtm_newlink() {
    // ifinfomsg: family, pad, type, index, flags, change
    let mut payload = vec![0u8, 0];
    payload.extend_from_slice(&1u16.to_ne_bytes());
    payload.extend_from_slice(&2i32.to_ne_bytes());
    payload.extend_from_slice(&(0x1u32 | 0x40).to_ne_bytes());
    payload.extend_from_slice(&0u32.to_ne_bytes());
    payload.extend(rta(IFLA_IFNAME, b"eth0\0"));
    payload.extend(rta(4, &1500u32.to_ne_bytes()));

    let mut frame = header((16 + payload.len()) as u32, rtnl::RTM_NEWLINK, 0, 1, 0);
    frame.extend(&payload);

    let mut mon = EventMonitor::new(
        nlbus::LoopbackBus::new().open(0).unwrap(),
        Vec::<NetworkEvent>::new(),
    );
    assert_eq!(mon.process_datagram(&frame), 1);
    match &mon.sink()[0] {
        NetworkEvent::LinkNew(info) => {
            assert_eq!(info.index, 2);
            assert_eq!(info.name.as_deref(), Some("eth0"));
            assert_eq!(info.state.to_string(), "UP RUNNING");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn golden_rtm_newaddr_ipv4() {
    // ifaddrmsg: family, prefixlen, flags, scope, index
    let mut payload = vec![2u8, 24, 0, 0];
    payload.extend_from_slice(&2u32.to_ne_bytes());
    payload.extend(rta(IFA_ADDRESS, &[192, 168, 1, 10]));
    payload.extend(rta(IFA_LOCAL, &[192, 168, 1, 10]));
    payload.extend(rta(IFA_LABEL, b"eth0\0"));

    let mut frame = header((16 + payload.len()) as u32, rtnl::RTM_NEWADDR, 0, 9, 0);
    frame.extend(&payload);

    let mut mon = EventMonitor::new(
        nlbus::LoopbackBus::new().open(0).unwrap(),
        Vec::<NetworkEvent>::new(),
    );
    mon.process_datagram(&frame);
    assert_eq!(
        mon.sink()[0].to_string(),
        "address 192.168.1.10/24 assigned on eth0"
    );
}

#[test]
fn golden_attribute_table() {
    let mut container = rta(1, &7u32.to_ne_bytes());
    container.extend(rta(3, b"lo\0"));
    container.extend(rta(9, b"ignored"));

    let table = attr::parse(&container, 3).unwrap();
    assert_eq!(table.get_u32(1), Some(7));
    assert_eq!(table.get_str(3), Some("lo"));
    assert!(table.get(2).is_none());
    assert_eq!(table.skipped(), 1);
}

#[test]
fn golden_attribute_overrun() {
    let mut container = rta(1, &7u32.to_ne_bytes());
    // Claims 32 bytes, only 8 follow.
    container.extend_from_slice(&32u16.to_ne_bytes());
    container.extend_from_slice(&2u16.to_ne_bytes());
    container.extend_from_slice(&[0u8; 4]);

    match attr::parse(&container, 3) {
        Err(NlError::MalformedAttributes { offset, .. }) => assert_eq!(offset, 8),
        other => panic!("expected MalformedAttributes, got {:?}", other),
    }
    let (table, err) = attr::parse_partial(&container, 3);
    assert!(err.is_some());
    assert_eq!(table.get_u32(1), Some(7));
}
