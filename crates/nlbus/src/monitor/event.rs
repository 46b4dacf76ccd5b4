// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network state events and their consumers.

use std::fmt;
use std::net::IpAddr;

use parking_lot::Mutex;

use super::rtnl::{IFF_RUNNING, IFF_UP};

/// Administrative and operational state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub up: bool,
    pub running: bool,
}

impl LinkState {
    pub fn from_flags(flags: u32) -> Self {
        Self {
            up: flags & IFF_UP != 0,
            running: flags & IFF_RUNNING != 0,
        }
    }
}

/// Renders as `UP RUNNING`, `DOWN NOT RUNNING` and so on.
impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let up = if self.up { "UP" } else { "DOWN" };
        let running = if self.running { "RUNNING" } else { "NOT RUNNING" };
        write!(f, "{} {}", up, running)
    }
}

/// Details common to link events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: i32,
    pub name: Option<String>,
    pub state: LinkState,
}

/// Details common to address events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub index: u32,
    pub family: u8,
    pub prefix_len: u8,
    /// Interface label, when the kernel sent one.
    pub label: Option<String>,
    pub address: Option<IpAddr>,
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    LinkNew(LinkInfo),
    LinkRemoved(LinkInfo),
    AddressNew(AddressInfo),
    AddressRemoved(AddressInfo),
    /// The routing table changed; no details are decoded.
    RouteChanged { removed: bool },
}

impl NetworkEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::LinkNew(_) => "link-new",
            Self::LinkRemoved(_) => "link-removed",
            Self::AddressNew(_) => "address-new",
            Self::AddressRemoved(_) => "address-removed",
            Self::RouteChanged { .. } => "route-changed",
        }
    }

    /// Interface name carried by the event, if any.
    pub fn interface(&self) -> Option<&str> {
        match self {
            Self::LinkNew(l) | Self::LinkRemoved(l) => l.name.as_deref(),
            Self::AddressNew(a) | Self::AddressRemoved(a) => a.label.as_deref(),
            Self::RouteChanged { .. } => None,
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.interface().unwrap_or("?");
        match self {
            Self::LinkNew(l) => write!(f, "link {} (index {}) added, state {}", name, l.index, l.state),
            Self::LinkRemoved(l) => write!(f, "link {} (index {}) removed", name, l.index),
            Self::AddressNew(a) => match a.address {
                Some(addr) => write!(f, "address {}/{} assigned on {}", addr, a.prefix_len, name),
                None => write!(f, "address assigned on {}", name),
            },
            Self::AddressRemoved(a) => match a.address {
                Some(addr) => write!(f, "address {}/{} removed from {}", addr, a.prefix_len, name),
                None => write!(f, "address removed from {}", name),
            },
            Self::RouteChanged { removed: false } => write!(f, "route added"),
            Self::RouteChanged { removed: true } => write!(f, "route removed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives every event the monitor decodes.
pub trait EventSink {
    fn on_event(&mut self, event: NetworkEvent);
}

impl<F: FnMut(NetworkEvent)> EventSink for F {
    fn on_event(&mut self, event: NetworkEvent) {
        self(event)
    }
}

impl EventSink for Vec<NetworkEvent> {
    fn on_event(&mut self, event: NetworkEvent) {
        self.push(event);
    }
}

/// Shared capture list, for sinks observed from another thread.
impl EventSink for std::sync::Arc<Mutex<Vec<NetworkEvent>>> {
    fn on_event(&mut self, event: NetworkEvent) {
        self.lock().push(event);
    }
}

/// Writes each event to the log at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&mut self, event: NetworkEvent) {
        log::info!("[monitor] {}: {}", event.kind_name(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_rendering() {
        assert_eq!(LinkState::from_flags(IFF_UP | IFF_RUNNING).to_string(), "UP RUNNING");
        assert_eq!(LinkState::from_flags(0).to_string(), "DOWN NOT RUNNING");
        assert_eq!(LinkState::from_flags(IFF_UP).to_string(), "UP NOT RUNNING");
        assert_eq!(LinkState::from_flags(IFF_RUNNING).to_string(), "DOWN RUNNING");
    }

    #[test]
    fn test_event_display() {
        let ev = NetworkEvent::AddressNew(AddressInfo {
            index: 2,
            family: 2,
            prefix_len: 24,
            label: Some("eth0".into()),
            address: Some("10.0.0.5".parse().unwrap()),
        });
        assert_eq!(ev.to_string(), "address 10.0.0.5/24 assigned on eth0");
        assert_eq!(ev.interface(), Some("eth0"));
        assert_eq!(NetworkEvent::RouteChanged { removed: true }.interface(), None);
    }

    #[test]
    fn test_closure_and_vec_sinks() {
        let mut seen = 0;
        {
            let mut sink = |_: NetworkEvent| seen += 1;
            sink.on_event(NetworkEvent::RouteChanged { removed: false });
        }
        assert_eq!(seen, 1);

        let mut list: Vec<NetworkEvent> = Vec::new();
        list.on_event(NetworkEvent::RouteChanged { removed: false });
        assert_eq!(list.len(), 1);
    }
}
