// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw `AF_NETLINK` socket transport (Linux only).
//!
//! `socket2` owns the descriptor; netlink addressing (`sockaddr_nl`) and
//! membership options go through `libc` since `socket2` has no netlink
//! address type.

use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::{DatagramSource, MessageHandler, Transport};
use crate::error::{NlError, Result};
use crate::registry::{EndpointId, GroupId, GroupSet};
use crate::wire::stamp_datagram;

/// Read timeout used by [`NetlinkSocket::serve`] so the loop can observe
/// its stop flag.
const SERVE_POLL: Duration = Duration::from_millis(250);

fn sockaddr_nl(port: u32, groups: u32) -> libc::sockaddr_nl {
    // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_pid = port;
    addr.nl_groups = groups;
    addr
}

const SOCKADDR_NL_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

/// A bound netlink socket.
pub struct NetlinkSocket {
    socket: Socket,
    protocol: u32,
    port: EndpointId,
    groups: Mutex<GroupSet>,
}

impl std::fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .field("groups", &*self.groups.lock())
            .finish()
    }
}

impl NetlinkSocket {
    /// Open a socket for `protocol` and bind it.
    ///
    /// `port` 0 lets the kernel pick the identity. Any failure here is
    /// reported as `TransportCreation`.
    pub fn bind(protocol: u32, port: u32) -> Result<Self> {
        let creation = |e: io::Error| NlError::TransportCreation(format!("protocol {}: {}", protocol, e));

        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::from(libc::SOCK_RAW),
            Some(Protocol::from(protocol as i32)),
        )
        .map_err(creation)?;

        let addr = sockaddr_nl(port, 0);
        // SAFETY: addr is a valid sockaddr_nl and the length matches.
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                SOCKADDR_NL_LEN,
            )
        };
        if ret < 0 {
            return Err(creation(io::Error::last_os_error()));
        }

        let mut bound = sockaddr_nl(0, 0);
        let mut len = SOCKADDR_NL_LEN;
        // SAFETY: bound is large enough for a sockaddr_nl and len says so.
        let ret = unsafe {
            libc::getsockname(
                socket.as_raw_fd(),
                &mut bound as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(creation(io::Error::last_os_error()));
        }

        log::info!(
            "[netlink] bound protocol {} as port {}",
            protocol,
            bound.nl_pid
        );
        Ok(Self {
            socket,
            protocol,
            port: EndpointId(bound.nl_pid),
            groups: Mutex::new(GroupSet::EMPTY),
        })
    }

    pub fn protocol(&self) -> u32 {
        self.protocol
    }

    /// Identity assigned at bind time.
    pub fn port(&self) -> EndpointId {
        self.port
    }

    pub fn groups(&self) -> GroupSet {
        *self.groups.lock()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        Ok(())
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn add_membership(&self, group: GroupId) -> Result<()> {
        self.membership(libc::NETLINK_ADD_MEMBERSHIP, group)?;
        self.groups.lock().insert(group);
        log::debug!("[netlink] port {} joined group {}", self.port, group);
        Ok(())
    }

    pub fn drop_membership(&self, group: GroupId) -> Result<()> {
        self.membership(libc::NETLINK_DROP_MEMBERSHIP, group)?;
        self.groups.lock().remove(group);
        log::debug!("[netlink] port {} left group {}", self.port, group);
        Ok(())
    }

    fn membership(&self, option: libc::c_int, group: GroupId) -> Result<()> {
        let id: u32 = group.get();
        // SAFETY: the option value is a u32 group number, as the kernel expects.
        let ret = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_NETLINK,
                option,
                &id as *const u32 as *const libc::c_void,
                mem::size_of::<u32>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn send_to(&self, addr: &libc::sockaddr_nl, frame: &[u8]) -> io::Result<usize> {
        // SAFETY: frame is a valid buffer and addr a valid sockaddr_nl.
        let n = unsafe {
            libc::sendto(
                self.socket.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                SOCKADDR_NL_LEN,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    /// Receive one datagram and stamp its frames with the source port.
    ///
    /// Returns `Ok(None)` on would-block, interruption or read timeout.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, EndpointId)>> {
        let mut from = sockaddr_nl(0, 0);
        let mut len = SOCKADDR_NL_LEN;
        // SAFETY: buf and from are valid for writes of the given lengths.
        let n = unsafe {
            libc::recvfrom(
                self.socket.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut from as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut len,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                    Ok(None)
                }
                _ => Err(err.into()),
            };
        }
        let n = n as usize;
        stamp_datagram(&mut buf[..n], from.nl_pid);
        Ok(Some((n, EndpointId(from.nl_pid))))
    }

    /// Feed inbound datagrams to `handler` until `running` is cleared.
    ///
    /// Replies go out through this same socket.
    pub fn serve(&self, handler: &dyn MessageHandler, running: &AtomicBool, buf_size: usize) -> Result<()> {
        self.set_nonblocking(false)?;
        self.set_read_timeout(Some(SERVE_POLL))?;
        let mut buf = vec![0u8; buf_size.max(crate::wire::HEADER_LEN)];

        log::info!(
            "[netlink] serving protocol {} on port {}",
            self.protocol,
            self.port
        );
        while running.load(Ordering::Relaxed) {
            match self.recv_from(&mut buf) {
                Ok(Some((n, from))) => {
                    log::debug!("[netlink] {} bytes from port {}", n, from);
                    handler.handle(self, &buf[..n]);
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("[netlink] receive failed: {}", e);
                    std::thread::sleep(SERVE_POLL);
                }
            }
        }
        log::info!("[netlink] serve loop on port {} stopped", self.port);
        Ok(())
    }
}

impl Transport for NetlinkSocket {
    fn send_unicast(&self, to: EndpointId, frame: &[u8]) -> Result<()> {
        self.send_to(&sockaddr_nl(to.0, 0), frame)?;
        Ok(())
    }

    /// The kernel does not report fan-out, so the count is always 0.
    ///
    /// Any member socket receives the copy, the publisher included; the
    /// kernel offers no way to leave one out, so `exclude` is refused with
    /// `Config`.
    fn send_multicast(
        &self,
        group: GroupId,
        frame: &[u8],
        exclude: Option<EndpointId>,
    ) -> Result<usize> {
        if let Some(id) = exclude {
            return Err(NlError::Config(format!(
                "netlink cannot exclude member {} from group {}",
                id, group
            )));
        }
        match self.send_to(&sockaddr_nl(0, group.bind_mask()), frame) {
            Ok(_) => Ok(0),
            // Group copies go out first; the refusal is the follow-up
            // unicast to port 0, which has no listener outside ROUTE.
            Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) && group.bind_mask() != 0 => {
                log::trace!("[netlink] group {} sent, port 0 refused", group);
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DatagramSource for NetlinkSocket {
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(self.recv_from(buf)?.map(|(n, _)| n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_nl_layout() {
        assert_eq!(mem::size_of::<libc::sockaddr_nl>(), 12);
        let addr = sockaddr_nl(42, 0x10);
        assert_eq!(addr.nl_family as i32, libc::AF_NETLINK);
        assert_eq!(addr.nl_pid, 42);
        assert_eq!(addr.nl_groups, 0x10);
    }

    #[test]
    fn test_usersock_loop() {
        // Unprivileged containers may lack netlink; skip quietly.
        let Ok(server) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        let Ok(client) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        if client.send_unicast(server.port(), b"abcd").is_err() {
            return;
        }
        server.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 64];
        if let Some((n, from)) = server.recv_from(&mut buf).unwrap() {
            assert_eq!(n, 4);
            assert_eq!(from, client.port());
        }
    }

    #[test]
    fn test_usersock_multicast_reaches_member() {
        let Ok(publisher) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        let Ok(member) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        if member.add_membership(GroupId::APP).is_err() {
            return;
        }
        member.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let frame = crate::wire::MessageCodec::default()
            .encode(b"fan", 0, crate::wire::msg_type::DONE, 1)
            .unwrap();
        assert_eq!(publisher.send_multicast(GroupId::APP, &frame, None), Ok(0));

        let mut buf = [0u8; 64];
        let (n, from) = member.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(from, publisher.port());
    }

    #[test]
    fn test_multicast_exclude_is_refused() {
        let Ok(socket) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        assert!(matches!(
            socket.send_multicast(GroupId::APP, b"x", Some(EndpointId(5))),
            Err(NlError::Config(_))
        ));
    }

    #[test]
    fn test_broker_over_netlink_counts_publication() {
        use crate::broker::MulticastBroker;
        use crate::wire::MessageCodec;

        let Ok(server) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        let Ok(member) = NetlinkSocket::bind(crate::transport::protocol::USERSOCK, 0) else {
            return;
        };
        if member.add_membership(GroupId::APP).is_err() {
            return;
        }
        member.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        let codec = MessageCodec::default();
        let broker = MulticastBroker::new(codec, GroupId::APP, true);
        let request = codec.encode(b"hello", member.port().get(), 0x11, 1).unwrap();
        broker.handle(&server, &request);

        let stats = broker.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 0);

        let mut buf = [0u8; 64];
        let (n, _) = member.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(codec.decode(&buf[..n]).unwrap().payload_text(), "hello");
    }
}
