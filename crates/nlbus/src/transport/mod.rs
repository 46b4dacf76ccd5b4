// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Delivery seam between the core and the datagram mechanism.
//
// The core never owns a socket. Handlers receive a `&dyn Transport` for the
// replies they emit, and the monitor reads through a `DatagramSource`.

pub mod loopback;
#[cfg(target_os = "linux")]
pub mod netlink;

use std::sync::Arc;

use crate::error::Result;
use crate::registry::{EndpointId, GroupId};

pub use loopback::{BusTransport, Endpoint, LoopbackBus, Registration};
#[cfg(target_os = "linux")]
pub use netlink::NetlinkSocket;

/// Number of protocol slots per address family.
pub const MAX_PROTOCOLS: u32 = 32;

/// Well-known protocol numbers.
pub mod protocol {
    /// Routing and link notifications.
    pub const ROUTE: u32 = 0;
    /// Reserved for userspace-to-userspace traffic.
    pub const USERSOCK: u32 = 2;
    /// Custom protocol used by the unicast service.
    pub const CUSTOM: u32 = 17;
    /// Alternative custom protocol.
    pub const CUSTOM_ALT: u32 = 31;
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Outbound delivery.
pub trait Transport: Send + Sync {
    /// Deliver `frame` to a single endpoint.
    fn send_unicast(&self, to: EndpointId, frame: &[u8]) -> Result<()>;

    /// Deliver `frame` to every member of `group` at the time of the call,
    /// skipping `exclude`. Returns how many endpoints were reached when the
    /// transport can tell.
    fn send_multicast(
        &self,
        group: GroupId,
        frame: &[u8],
        exclude: Option<EndpointId>,
    ) -> Result<usize>;
}

/// Inbound callback registered with a transport at startup.
///
/// `datagram` is exactly what the transport delivered, with the sender
/// field of each frame already stamped.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, transport: &dyn Transport, datagram: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&dyn Transport, &[u8]) + Send + Sync,
{
    fn handle(&self, transport: &dyn Transport, datagram: &[u8]) {
        self(transport, datagram)
    }
}

/// Non-blocking inbound datagrams.
pub trait DatagramSource {
    /// Copy the next datagram into `buf`.
    ///
    /// `Ok(None)` means nothing is pending (would block or interrupted).
    /// A datagram longer than `buf` is truncated.
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>>;
}

impl<T: DatagramSource + ?Sized> DatagramSource for &T {
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        (**self).try_recv(buf)
    }
}

impl<T: DatagramSource + ?Sized> DatagramSource for Arc<T> {
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        (**self).try_recv(buf)
    }
}
