// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Netlink-style datagram messaging core.
//!
//! Framing, attribute decoding, group addressing and three services built on
//! them: a unicast request/reply responder, a group publish/subscribe broker
//! and a monitor for link / address / route notifications.
//!
//! # Architecture
//!
//! ```text
//!  endpoint 42                 transport                    handler
//!      |                           |                           |
//!      |-- frame(seq 9) ---------->| stamp sender = 42 ------->| decode
//!      |                           |                           | build reply
//!      |<-- DONE(seq 9) -----------|<-- send_unicast(42) ------|
//!      |                           |                           |
//!  members of group 17             |<-- send_multicast(17) ----| broker
//!      |<-- copy ------------------| snapshot of group 17      |
//! ```
//!
//! # Transports
//!
//! | Transport | Use Case |
//! |-----------|----------|
//! | [`LoopbackBus`] | In-process, tests and embedding |
//! | `NetlinkSocket` | Raw `AF_NETLINK` socket (Linux only) |
//!
//! # Wire format
//!
//! A frame is a 16-byte header (`length`, `type`, `flags`, `sequence`,
//! `sender`, host byte order) and a payload padded to 4 bytes. Payloads may
//! hold attribute records (`length u16`, `type u16`, value), also 4-byte
//! aligned. See [`wire`] and [`attr`].

pub mod attr;
pub mod broker;
pub mod config;
pub mod cursor;
pub mod error;
pub mod module;
pub mod monitor;
pub mod registry;
pub mod responder;
pub mod transport;
pub mod wire;

// Re-exports for convenience.
pub use attr::{parse as parse_attributes, parse_partial as parse_attributes_partial, AttrTable, AttrWriter, RawAttr};
pub use broker::{BrokerStatsSnapshot, MulticastBroker};
pub use config::NlbusConfig;
pub use error::{NlError, Result};
pub use module::{NetlinkModule, Service};
pub use monitor::{EventMonitor, EventSink, LinkState, LogSink, MonitorStats, NetworkEvent};
pub use registry::{AddressRegistry, EndpointId, GroupId, GroupSet};
pub use responder::{HandlerState, ReplyMode, ResponderStatsSnapshot, UnicastResponder};
pub use transport::{DatagramSource, Endpoint, LoopbackBus, MessageHandler, Transport};
#[cfg(target_os = "linux")]
pub use transport::NetlinkSocket;
pub use wire::{FrameHeader, FrameIter, FrameView, MessageCodec, MessageFrame, HEADER_LEN};
