// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing-family payloads: link and address sub-headers and attributes.

use crate::attr::{self, AttrTable, AttrWriter};
use crate::cursor::{ByteCursor, ShortRead};
use crate::error::{NlError, Result};
use crate::wire::FrameHeader;

use super::event::{AddressInfo, LinkInfo, LinkState, NetworkEvent};

// Message types
pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_NEWADDR: u16 = 20;
pub const RTM_DELADDR: u16 = 21;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;

// Link attributes
pub const IFLA_ADDRESS: u16 = 1;
pub const IFLA_IFNAME: u16 = 3;
pub const IFLA_MTU: u16 = 4;
const IFLA_MAX_DECODED: u16 = IFLA_MTU;

// Address attributes
pub const IFA_ADDRESS: u16 = 1;
pub const IFA_LOCAL: u16 = 2;
pub const IFA_LABEL: u16 = 3;
const IFA_MAX_DECODED: u16 = IFA_LABEL;

// Interface flags
pub const IFF_UP: u32 = 0x1;
pub const IFF_RUNNING: u32 = 0x40;

pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;

/// Size of the link sub-header.
pub const IFINFOMSG_LEN: usize = 16;
/// Size of the address sub-header.
pub const IFADDRMSG_LEN: usize = 8;

/// Link sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfInfoMsg {
    pub family: u8,
    pub device_type: u16,
    pub index: i32,
    pub flags: u32,
    pub change: u32,
}

impl IfInfoMsg {
    pub fn read(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let short = |e: ShortRead| NlError::frame(format!("link sub-header: {}", e));
        let family = cur.read_u8().map_err(short)?;
        cur.skip(1).map_err(short)?;
        Ok(Self {
            family,
            device_type: cur.read_u16().map_err(short)?,
            index: cur.read_i32().map_err(short)?,
            flags: cur.read_u32().map_err(short)?,
            change: cur.read_u32().map_err(short)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; IFINFOMSG_LEN] {
        let mut out = [0u8; IFINFOMSG_LEN];
        out[0] = self.family;
        out[2..4].copy_from_slice(&self.device_type.to_ne_bytes());
        out[4..8].copy_from_slice(&self.index.to_ne_bytes());
        out[8..12].copy_from_slice(&self.flags.to_ne_bytes());
        out[12..16].copy_from_slice(&self.change.to_ne_bytes());
        out
    }
}

/// Address sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfAddrMsg {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
}

impl IfAddrMsg {
    pub fn read(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let short = |e: ShortRead| NlError::frame(format!("address sub-header: {}", e));
        Ok(Self {
            family: cur.read_u8().map_err(short)?,
            prefix_len: cur.read_u8().map_err(short)?,
            flags: cur.read_u8().map_err(short)?,
            scope: cur.read_u8().map_err(short)?,
            index: cur.read_u32().map_err(short)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; IFADDRMSG_LEN] {
        let mut out = [0u8; IFADDRMSG_LEN];
        out[0] = self.family;
        out[1] = self.prefix_len;
        out[2] = self.flags;
        out[3] = self.scope;
        out[4..8].copy_from_slice(&self.index.to_ne_bytes());
        out
    }
}

/// An event together with any attribute fault hit while decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub event: NetworkEvent,
    /// Attributes after this fault were abandoned.
    pub attr_error: Option<NlError>,
}

/// Decode one routing-family frame.
///
/// `Ok(None)` for types that carry no event. A truncated sub-header is a
/// `MalformedFrame`; a bad attribute record still yields the event with
/// whatever was decoded before it.
pub fn decode_event(header: &FrameHeader, payload: &[u8]) -> Result<Option<Decoded>> {
    match header.kind {
        RTM_NEWROUTE | RTM_DELROUTE => Ok(Some(Decoded {
            event: NetworkEvent::RouteChanged {
                removed: header.kind == RTM_DELROUTE,
            },
            attr_error: None,
        })),
        RTM_NEWLINK | RTM_DELLINK => {
            let mut cur = ByteCursor::new(payload);
            let ifi = IfInfoMsg::read(&mut cur)?;
            let (attrs, attr_error) = attr::parse_partial(cur.rest(), IFLA_MAX_DECODED);
            let info = LinkInfo {
                index: ifi.index,
                name: attrs.get_str(IFLA_IFNAME).map(str::to_owned),
                state: LinkState::from_flags(ifi.flags),
            };
            let event = if header.kind == RTM_NEWLINK {
                NetworkEvent::LinkNew(info)
            } else {
                NetworkEvent::LinkRemoved(info)
            };
            Ok(Some(Decoded { event, attr_error }))
        }
        RTM_NEWADDR | RTM_DELADDR => {
            let mut cur = ByteCursor::new(payload);
            let ifa = IfAddrMsg::read(&mut cur)?;
            let (attrs, attr_error) = attr::parse_partial(cur.rest(), IFA_MAX_DECODED);
            let info = AddressInfo {
                index: ifa.index,
                family: ifa.family,
                prefix_len: ifa.prefix_len,
                label: attrs.get_str(IFA_LABEL).map(str::to_owned),
                address: pick_address(ifa.family, &attrs),
            };
            let event = if header.kind == RTM_NEWADDR {
                NetworkEvent::AddressNew(info)
            } else {
                NetworkEvent::AddressRemoved(info)
            };
            Ok(Some(Decoded { event, attr_error }))
        }
        _ => Ok(None),
    }
}

/// IFA_LOCAL is the interface's own address on IPv4 (IFA_ADDRESS is the
/// peer on point-to-point links); other families only send IFA_ADDRESS.
fn pick_address(family: u8, attrs: &AttrTable<'_>) -> Option<std::net::IpAddr> {
    let local = attrs.get(IFA_LOCAL).and_then(|a| a.as_ip_addr());
    let address = attrs.get(IFA_ADDRESS).and_then(|a| a.as_ip_addr());
    if family == AF_INET {
        local.or(address)
    } else {
        address.or(local)
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

/// Link payload: sub-header followed by the interface name.
pub fn link_payload(index: i32, flags: u32, name: &str) -> Result<Vec<u8>> {
    let ifi = IfInfoMsg {
        index,
        flags,
        ..Default::default()
    };
    let mut w = AttrWriter::with_prefix(&ifi.to_bytes());
    w.put_str(IFLA_IFNAME, name)?;
    Ok(w.finish())
}

/// Address payload: sub-header, label and address attributes.
pub fn address_payload(index: u32, addr: std::net::IpAddr, prefix_len: u8, label: &str) -> Result<Vec<u8>> {
    let family = if addr.is_ipv4() { AF_INET } else { AF_INET6 };
    let ifa = IfAddrMsg {
        family,
        prefix_len,
        index,
        ..Default::default()
    };
    let mut w = AttrWriter::with_prefix(&ifa.to_bytes());
    w.put_ip_addr(IFA_ADDRESS, addr)?;
    if family == AF_INET {
        w.put_ip_addr(IFA_LOCAL, addr)?;
    }
    w.put_str(IFA_LABEL, label)?;
    Ok(w.finish())
}
