// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// In-process datagram bus.
//
// Simulates the kernel side of the address family: a table of protocol
// slots, each with at most one registered handler, a set of endpoints with
// bounded inboxes and a group membership registry. Sender fields are stamped
// on delivery, multicast works on a snapshot of the group taken at send
// time, and an endpoint's memberships go away when it is dropped.
//
// Handlers run on the sending thread. No bus lock is held while a handler
// runs, so handlers may send freely.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{DatagramSource, MessageHandler, Transport, MAX_PROTOCOLS};
use crate::error::{NlError, Result};
use crate::registry::{AddressRegistry, EndpointId, GroupId, GroupSet};
use crate::wire::stamp_datagram;

/// Default number of datagrams queued per endpoint.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// First identity handed out by [`LoopbackBus::open`].
const FIRST_DYNAMIC_ID: u32 = 1000;

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    overruns: AtomicU64,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            overruns: AtomicU64::new(0),
        }
    }

    /// Queue a datagram, dropping the oldest one when full.
    fn push(&self, datagram: Vec<u8>) {
        let mut q = self.queue.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(datagram);
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProtocolSlot {
    handler: Option<Arc<dyn MessageHandler>>,
    endpoints: HashMap<EndpointId, Arc<Inbox>>,
    registry: AddressRegistry,
}

struct BusInner {
    slots: Vec<RwLock<ProtocolSlot>>,
    next_id: AtomicU32,
    inbox_capacity: usize,
}

impl BusInner {
    fn slot(&self, protocol: u32) -> Result<&RwLock<ProtocolSlot>> {
        self.slots
            .get(protocol as usize)
            .ok_or_else(|| NlError::TransportCreation(format!("protocol {} out of range", protocol)))
    }

    fn deliver(&self, protocol: u32, to: EndpointId, mut datagram: Vec<u8>, from: EndpointId) -> Result<()> {
        let inbox = {
            let slot = self.slot(protocol)?.read();
            slot.endpoints.get(&to).cloned()
        };
        let inbox = inbox.ok_or(NlError::UnknownEndpoint(to.0))?;
        stamp_datagram(&mut datagram, from.0);
        inbox.push(datagram);
        Ok(())
    }

    fn fan_out(
        &self,
        protocol: u32,
        group: GroupId,
        frame: &[u8],
        from: EndpointId,
        exclude: Option<EndpointId>,
    ) -> Result<usize> {
        // Snapshot; later joiners do not see this datagram.
        let targets: Vec<Arc<Inbox>> = {
            let slot = self.slot(protocol)?.read();
            slot.registry
                .members(group)
                .into_iter()
                .filter(|id| Some(*id) != exclude)
                .filter_map(|id| slot.endpoints.get(&id).cloned())
                .collect()
        };

        let mut stamped = frame.to_vec();
        stamp_datagram(&mut stamped, from.0);
        for inbox in &targets {
            inbox.push(stamped.clone());
        }
        log::debug!(
            "[loopback] proto {} group {}: {} bytes to {} endpoint(s)",
            protocol,
            group,
            frame.len(),
            targets.len()
        );
        Ok(targets.len())
    }
}

/// In-process bus shared by every endpoint and handler of a process.
///
/// Cloning is cheap and every clone refers to the same bus.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackBus")
            .field("inbox_capacity", &self.inner.inbox_capacity)
            .finish_non_exhaustive()
    }
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                slots: (0..MAX_PROTOCOLS)
                    .map(|_| RwLock::new(ProtocolSlot::default()))
                    .collect(),
                next_id: AtomicU32::new(FIRST_DYNAMIC_ID),
                inbox_capacity: capacity.max(1),
            }),
        }
    }

    /// Install the handler for `protocol`.
    ///
    /// Fails with `TransportCreation` if the protocol is out of range or
    /// already taken. The handler stays installed until the returned
    /// [`Registration`] is dropped.
    pub fn register(&self, protocol: u32, handler: Arc<dyn MessageHandler>) -> Result<Registration> {
        let mut slot = self.inner.slot(protocol)?.write();
        if slot.handler.is_some() {
            return Err(NlError::TransportCreation(format!(
                "protocol {} already has a handler",
                protocol
            )));
        }
        slot.handler = Some(handler);
        log::info!("[loopback] handler registered on protocol {}", protocol);
        Ok(Registration {
            bus: Arc::clone(&self.inner),
            protocol,
        })
    }

    pub fn is_registered(&self, protocol: u32) -> bool {
        self.inner
            .slot(protocol)
            .map(|s| s.read().handler.is_some())
            .unwrap_or(false)
    }

    /// Open an endpoint with a bus-assigned identity.
    pub fn open(&self, protocol: u32) -> Result<Endpoint> {
        let mut slot = self.inner.slot(protocol)?.write();
        let id = loop {
            let candidate = EndpointId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            if candidate != EndpointId::KERNEL && !slot.endpoints.contains_key(&candidate) {
                break candidate;
            }
        };
        Ok(self.attach(&mut slot, protocol, id))
    }

    /// Open an endpoint with a chosen identity.
    pub fn open_with_id(&self, protocol: u32, id: EndpointId) -> Result<Endpoint> {
        let mut slot = self.inner.slot(protocol)?.write();
        if id == EndpointId::KERNEL || slot.endpoints.contains_key(&id) {
            return Err(NlError::TransportCreation(format!(
                "endpoint id {} unavailable on protocol {}",
                id, protocol
            )));
        }
        Ok(self.attach(&mut slot, protocol, id))
    }

    fn attach(&self, slot: &mut ProtocolSlot, protocol: u32, id: EndpointId) -> Endpoint {
        let inbox = Arc::new(Inbox::new(self.inner.inbox_capacity));
        slot.endpoints.insert(id, Arc::clone(&inbox));
        log::debug!("[loopback] endpoint {} opened on protocol {}", id, protocol);
        Endpoint {
            bus: Arc::clone(&self.inner),
            protocol,
            id,
            inbox,
        }
    }

    /// Module-side transport for `protocol`: sends carry sender 0.
    pub fn transport(&self, protocol: u32) -> Result<BusTransport> {
        self.inner.slot(protocol)?;
        Ok(BusTransport {
            bus: Arc::clone(&self.inner),
            protocol,
        })
    }

    /// Snapshot of `group` on `protocol`.
    pub fn members(&self, protocol: u32, group: GroupId) -> Vec<EndpointId> {
        self.inner
            .slot(protocol)
            .map(|s| s.read().registry.members(group))
            .unwrap_or_default()
    }
}

/// Keeps a protocol handler installed. Dropping it uninstalls the handler.
pub struct Registration {
    bus: Arc<BusInner>,
    protocol: u32,
}

impl Registration {
    pub fn protocol(&self) -> u32 {
        self.protocol
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(slot) = self.bus.slot(self.protocol) {
            slot.write().handler = None;
            log::info!("[loopback] handler released on protocol {}", self.protocol);
        }
    }
}

// ---------------------------------------------------------------------------
// Module-side transport
// ---------------------------------------------------------------------------

/// [`Transport`] used by handlers; frames originate from identity 0.
#[derive(Clone)]
pub struct BusTransport {
    bus: Arc<BusInner>,
    protocol: u32,
}

impl BusTransport {
    pub fn protocol(&self) -> u32 {
        self.protocol
    }
}

impl Transport for BusTransport {
    fn send_unicast(&self, to: EndpointId, frame: &[u8]) -> Result<()> {
        self.bus
            .deliver(self.protocol, to, frame.to_vec(), EndpointId::KERNEL)
    }

    fn send_multicast(
        &self,
        group: GroupId,
        frame: &[u8],
        exclude: Option<EndpointId>,
    ) -> Result<usize> {
        self.bus
            .fan_out(self.protocol, group, frame, EndpointId::KERNEL, exclude)
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A userspace endpoint attached to one protocol.
pub struct Endpoint {
    bus: Arc<BusInner>,
    protocol: u32,
    id: EndpointId,
    inbox: Arc<Inbox>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("protocol", &self.protocol)
            .field("id", &self.id)
            .finish()
    }
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn protocol(&self) -> u32 {
        self.protocol
    }

    /// Send a datagram to the protocol's handler.
    ///
    /// The handler runs before this returns. Fails with
    /// `UnknownEndpoint(0)` when no handler is registered.
    pub fn send(&self, datagram: &[u8]) -> Result<()> {
        let handler = self.bus.slot(self.protocol)?.read().handler.clone();
        let handler = handler.ok_or(NlError::UnknownEndpoint(EndpointId::KERNEL.0))?;

        let mut stamped = datagram.to_vec();
        stamp_datagram(&mut stamped, self.id.0);
        let transport = BusTransport {
            bus: Arc::clone(&self.bus),
            protocol: self.protocol,
        };
        handler.handle(&transport, &stamped);
        Ok(())
    }

    /// Send to another endpoint, or to the handler when `to` is 0.
    pub fn send_to(&self, to: EndpointId, datagram: &[u8]) -> Result<()> {
        if to == EndpointId::KERNEL {
            return self.send(datagram);
        }
        self.bus
            .deliver(self.protocol, to, datagram.to_vec(), self.id)
    }

    /// Send to every member of `group` other than this endpoint.
    pub fn send_group(&self, group: GroupId, datagram: &[u8]) -> Result<usize> {
        self.bus
            .fan_out(self.protocol, group, datagram, self.id, Some(self.id))
    }

    pub fn subscribe(&self, group: GroupId) -> Result<bool> {
        Ok(self
            .bus
            .slot(self.protocol)?
            .write()
            .registry
            .subscribe(self.id, group))
    }

    pub fn unsubscribe(&self, group: GroupId) -> Result<bool> {
        Ok(self
            .bus
            .slot(self.protocol)?
            .write()
            .registry
            .unsubscribe(self.id, group))
    }

    pub fn groups(&self) -> GroupSet {
        self.bus
            .slot(self.protocol)
            .map(|s| s.read().registry.groups_of(self.id))
            .unwrap_or_default()
    }

    /// Pop the oldest queued datagram.
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.inbox.queue.lock().pop_front()
    }

    /// Take every queued datagram, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.inbox.queue.lock().drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.inbox.queue.lock().len()
    }

    /// Datagrams dropped because the inbox was full.
    pub fn overruns(&self) -> u64 {
        self.inbox.overruns.load(Ordering::Relaxed)
    }
}

impl DatagramSource for Endpoint {
    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(datagram) = self.recv() else {
            return Ok(None);
        };
        let n = datagram.len().min(buf.len());
        if n < datagram.len() {
            log::debug!(
                "[loopback] endpoint {}: datagram truncated {} -> {} bytes",
                self.id,
                datagram.len(),
                n
            );
        }
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some(n))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Ok(slot) = self.bus.slot(self.protocol) {
            let mut slot = slot.write();
            slot.endpoints.remove(&self.id);
            slot.registry.remove_endpoint(self.id);
        }
        log::debug!("[loopback] endpoint {} closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageCodec;

    const PROTO: u32 = 17;

    #[test]
    fn test_register_rejects_taken_and_out_of_range() {
        let bus = LoopbackBus::new();
        let noop: Arc<dyn MessageHandler> = Arc::new(|_: &dyn Transport, _: &[u8]| {});
        let reg = bus.register(PROTO, Arc::clone(&noop)).unwrap();
        assert!(matches!(
            bus.register(PROTO, Arc::clone(&noop)),
            Err(NlError::TransportCreation(_))
        ));
        assert!(matches!(
            bus.register(MAX_PROTOCOLS, Arc::clone(&noop)),
            Err(NlError::TransportCreation(_))
        ));
        drop(reg);
        assert!(!bus.is_registered(PROTO));
        assert!(bus.register(PROTO, noop).is_ok());
    }

    #[test]
    fn test_send_without_handler_fails() {
        let bus = LoopbackBus::new();
        let ep = bus.open(PROTO).unwrap();
        assert_eq!(ep.send(b"x"), Err(NlError::UnknownEndpoint(0)));
    }

    #[test]
    fn test_sender_is_stamped() {
        let bus = LoopbackBus::new();
        let codec = MessageCodec::default();
        let a = bus.open_with_id(PROTO, EndpointId(7)).unwrap();
        let b = bus.open_with_id(PROTO, EndpointId(8)).unwrap();

        // Claim to be someone else; the bus overwrites it.
        let forged = codec.encode(b"hi", 9999, 0x20, 1).unwrap();
        a.send_to(b.id(), &forged).unwrap();
        let got = codec.decode(&b.recv().unwrap()).unwrap();
        assert_eq!(got.sender(), 7);
    }

    #[test]
    fn test_open_with_id_rejects_duplicates_and_zero() {
        let bus = LoopbackBus::new();
        let _a = bus.open_with_id(PROTO, EndpointId(42)).unwrap();
        assert!(bus.open_with_id(PROTO, EndpointId(42)).is_err());
        assert!(bus.open_with_id(PROTO, EndpointId::KERNEL).is_err());
        // Same id on another protocol is fine.
        assert!(bus.open_with_id(PROTO + 1, EndpointId(42)).is_ok());
    }

    #[test]
    fn test_unicast_to_unknown_endpoint() {
        let bus = LoopbackBus::new();
        let t = bus.transport(PROTO).unwrap();
        assert_eq!(
            t.send_unicast(EndpointId(5), b"x"),
            Err(NlError::UnknownEndpoint(5))
        );
    }

    #[test]
    fn test_multicast_exclude_and_drop_cleanup() {
        let bus = LoopbackBus::new();
        let t = bus.transport(PROTO).unwrap();
        let a = bus.open(PROTO).unwrap();
        let b = bus.open(PROTO).unwrap();
        a.subscribe(GroupId::APP).unwrap();
        b.subscribe(GroupId::APP).unwrap();

        assert_eq!(t.send_multicast(GroupId::APP, b"m", Some(a.id())).unwrap(), 1);
        assert_eq!(a.pending(), 0);
        assert_eq!(b.pending(), 1);

        let b_id = b.id();
        drop(b);
        assert_eq!(bus.members(PROTO, GroupId::APP), vec![a.id()]);
        assert!(!bus.members(PROTO, GroupId::APP).contains(&b_id));
    }

    #[test]
    fn test_inbox_drops_oldest_on_overflow() {
        let bus = LoopbackBus::with_inbox_capacity(2);
        let t = bus.transport(PROTO).unwrap();
        let ep = bus.open(PROTO).unwrap();
        for payload in [b"1", b"2", b"3"] {
            t.send_unicast(ep.id(), payload).unwrap();
        }
        assert_eq!(ep.overruns(), 1);
        assert_eq!(ep.drain(), vec![b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_try_recv_truncates() {
        let bus = LoopbackBus::new();
        let t = bus.transport(PROTO).unwrap();
        let ep = bus.open(PROTO).unwrap();
        t.send_unicast(ep.id(), b"abcdef").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(ep.try_recv(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(ep.try_recv(&mut buf).unwrap(), None);
    }
}
