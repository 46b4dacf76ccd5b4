// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Group publish/subscribe service.
//
// Every inbound frame is re-published as a `DONE` frame to one configured
// group. The transport takes the membership snapshot; there is no ack and
// no delivery-count guarantee.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::NlbusConfig;
use crate::error::Result;
use crate::registry::{EndpointId, GroupId};
use crate::responder::{state_of, HandlerState, InFlight};
use crate::transport::{MessageHandler, Transport};
use crate::wire::{msg_type, payload_text, until_nul, MessageCodec, MessageFrame};

#[derive(Debug, Default)]
pub struct BrokerStats {
    handled: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStatsSnapshot {
    pub handled: u64,
    /// Frames handed to the transport.
    pub published: u64,
    /// Sum of the fan-out counts reported by the transport.
    pub delivered: u64,
    pub dropped: u64,
    pub malformed: u64,
}

impl BrokerStats {
    pub fn snapshot(&self) -> BrokerStatsSnapshot {
        BrokerStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Re-publishes each inbound message to a group.
#[derive(Debug)]
pub struct MulticastBroker {
    codec: MessageCodec,
    group: GroupId,
    deliver_to_sender: bool,
    in_flight: AtomicUsize,
    stats: BrokerStats,
}

impl MulticastBroker {
    /// With `deliver_to_sender` the publisher receives its own message when
    /// it is a member of the group.
    pub fn new(codec: MessageCodec, group: GroupId, deliver_to_sender: bool) -> Self {
        Self {
            codec,
            group,
            deliver_to_sender,
            in_flight: AtomicUsize::new(0),
            stats: BrokerStats::default(),
        }
    }

    pub fn from_config(config: &NlbusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            MessageCodec::new(config.codec.max_payload),
            GroupId::new(config.broker.group)?,
            config.broker.deliver_to_sender,
        ))
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn deliver_to_sender(&self) -> bool {
        self.deliver_to_sender
    }

    pub fn state(&self) -> HandlerState {
        state_of(&self.in_flight)
    }

    pub fn stats(&self) -> BrokerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Frame published for an inbound message.
    pub fn build_publication(&self, inbound: &MessageFrame) -> Result<Vec<u8>> {
        self.codec.encode(
            until_nul(&inbound.payload),
            EndpointId::KERNEL.get(),
            msg_type::DONE,
            inbound.sequence(),
        )
    }
}

impl MessageHandler for MulticastBroker {
    fn handle(&self, transport: &dyn Transport, datagram: &[u8]) {
        let _busy = InFlight::enter(&self.in_flight);
        self.stats.handled.fetch_add(1, Ordering::Relaxed);

        let inbound = match self.codec.decode(datagram) {
            Ok(f) => f,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("[broker] discarding {} byte datagram: {}", datagram.len(), e);
                return;
            }
        };
        log::info!(
            "[broker] received from {}: {}",
            inbound.sender(),
            payload_text(&inbound.payload)
        );

        let frame = match self.build_publication(&inbound) {
            Ok(f) => f,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[broker] publication from {} dropped: {}", inbound.sender(), e);
                return;
            }
        };

        let exclude = (!self.deliver_to_sender).then(|| EndpointId(inbound.sender()));
        match transport.send_multicast(self.group, &frame, exclude) {
            Ok(n) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                self.stats.delivered.fetch_add(n as u64, Ordering::Relaxed);
                log::debug!("[broker] group {}: fan-out {}", self.group, n);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("[broker] publish to group {} failed: {}", self.group, e);
            }
        }
    }
}
