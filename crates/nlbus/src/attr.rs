// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute records (TLV) carried inside message payloads.
//!
//! Each record is `length: u16` (header included), `type: u16`, then the
//! value. Records are padded to 4 bytes. [`parse`] walks a container and
//! indexes the records by type into an [`AttrTable`] that borrows from the
//! container; nothing is copied.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::cursor::{align4, ByteCursor};
use crate::error::{NlError, Result};

/// Size of the record header.
pub const ATTR_HEADER_LEN: usize = 4;

/// Type bit marking a record whose value is itself an attribute container.
pub const NLA_F_NESTED: u16 = 1 << 15;
/// Type bit marking a value stored in network byte order.
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
/// Mask selecting the type number.
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Largest value a single record can carry.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize - ATTR_HEADER_LEN;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One attribute record borrowed from its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAttr<'a> {
    raw_type: u16,
    offset: usize,
    value: &'a [u8],
}

impl<'a> RawAttr<'a> {
    /// Type number with the flag bits masked off.
    pub fn kind(&self) -> u16 {
        self.raw_type & NLA_TYPE_MASK
    }

    pub fn is_nested(&self) -> bool {
        self.raw_type & NLA_F_NESTED != 0
    }

    pub fn is_net_byteorder(&self) -> bool {
        self.raw_type & NLA_F_NET_BYTEORDER != 0
    }

    /// Offset of the record header inside its container.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.value
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.value {
            [b] => Some(*b),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        let arr: [u8; 2] = self.value.try_into().ok()?;
        Some(u16::from_ne_bytes(arr))
    }

    pub fn as_u32(&self) -> Option<u32> {
        let arr: [u8; 4] = self.value.try_into().ok()?;
        Some(u32::from_ne_bytes(arr))
    }

    /// Value as a C string: up to the first NUL, must be UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        let end = self
            .value
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.value.len());
        std::str::from_utf8(&self.value[..end]).ok()
    }

    /// Value as an IPv4 (4 octets) or IPv6 (16 octets) address.
    pub fn as_ip_addr(&self) -> Option<IpAddr> {
        match self.value.len() {
            4 => {
                let o: [u8; 4] = self.value.try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(o)))
            }
            16 => {
                let o: [u8; 16] = self.value.try_into().ok()?;
                Some(IpAddr::V6(Ipv6Addr::from(o)))
            }
            _ => None,
        }
    }

    /// Parse the value as a nested container.
    pub fn nested(&self, max_type: u16) -> Result<AttrTable<'a>> {
        parse(self.value, max_type)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Records of one container indexed by type, `max_type + 1` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrTable<'a> {
    slots: Vec<Option<RawAttr<'a>>>,
    skipped: usize,
}

impl<'a> AttrTable<'a> {
    fn with_max_type(max_type: u16) -> Self {
        Self {
            slots: vec![None; max_type as usize + 1],
            skipped: 0,
        }
    }

    pub fn max_type(&self) -> u16 {
        (self.slots.len() - 1) as u16
    }

    pub fn get(&self, kind: u16) -> Option<&RawAttr<'a>> {
        self.slots.get(kind as usize).and_then(Option::as_ref)
    }

    pub fn contains(&self, kind: u16) -> bool {
        self.get(kind).is_some()
    }

    pub fn get_str(&self, kind: u16) -> Option<&'a str> {
        self.get(kind).and_then(RawAttr::as_str)
    }

    pub fn get_u32(&self, kind: u16) -> Option<u32> {
        self.get(kind).and_then(RawAttr::as_u32)
    }

    /// Number of populated slots.
    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Records dropped because their type exceeded `max_type`.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Populated records in type order.
    pub fn iter(&self) -> impl Iterator<Item = &RawAttr<'a>> {
        self.slots.iter().flatten()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a container, failing on the first inconsistent record.
pub fn parse(container: &[u8], max_type: u16) -> Result<AttrTable<'_>> {
    match parse_partial(container, max_type) {
        (table, None) => Ok(table),
        (_, Some(err)) => Err(err),
    }
}

/// Parse a container, keeping whatever was indexed before a fault.
///
/// On a bad record the walk stops; the table holds every record before it
/// and the error describes the fault.
pub fn parse_partial(container: &[u8], max_type: u16) -> (AttrTable<'_>, Option<NlError>) {
    let mut table = AttrTable::with_max_type(max_type);
    let mut cur = ByteCursor::new(container);

    // Fewer than a header's worth of trailing bytes is padding.
    while cur.remaining() >= ATTR_HEADER_LEN {
        let offset = cur.position();
        let available = cur.remaining();
        let (len, raw_type) = match (cur.read_u16(), cur.read_u16()) {
            (Ok(l), Ok(t)) => (l as usize, t),
            _ => return (table, Some(NlError::attrs(offset, "truncated header"))),
        };

        if len < ATTR_HEADER_LEN {
            return (
                table,
                Some(NlError::attrs(
                    offset,
                    format!("record length {} below header size", len),
                )),
            );
        }
        if len > available {
            return (
                table,
                Some(NlError::attrs(
                    offset,
                    format!(
                        "record length {} exceeds the {} bytes left in the container",
                        len, available
                    ),
                )),
            );
        }

        let value = match cur.take(len - ATTR_HEADER_LEN) {
            Ok(v) => v,
            Err(e) => return (table, Some(NlError::attrs(offset, e.to_string()))),
        };
        cur.skip_saturating(align4(len) - len);

        let attr = RawAttr {
            raw_type,
            offset,
            value,
        };
        match table.slots.get_mut(attr.kind() as usize) {
            Some(slot) => *slot = Some(attr),
            None => table.skipped += 1,
        }
    }

    (table, None)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builds an attribute container with correct padding.
#[derive(Debug, Clone, Default)]
pub struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start after an existing prefix (e.g. a fixed sub-header).
    pub fn with_prefix(prefix: &[u8]) -> Self {
        let mut buf = prefix.to_vec();
        buf.resize(align4(buf.len()), 0);
        Self { buf }
    }

    /// Append one record.
    pub fn put(&mut self, kind: u16, value: &[u8]) -> Result<&mut Self> {
        if value.len() > MAX_VALUE_LEN {
            return Err(NlError::FrameTooLarge {
                len: value.len(),
                max: MAX_VALUE_LEN,
            });
        }
        let len = ATTR_HEADER_LEN + value.len();
        self.buf.try_reserve(align4(len))?;
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(value);
        self.buf.resize(align4(self.buf.len()), 0);
        Ok(self)
    }

    pub fn put_u32(&mut self, kind: u16, value: u32) -> Result<&mut Self> {
        self.put(kind, &value.to_ne_bytes())
    }

    /// Append a NUL-terminated string.
    pub fn put_str(&mut self, kind: u16, value: &str) -> Result<&mut Self> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.put(kind, &bytes)
    }

    /// Append an address as network-order octets.
    pub fn put_ip_addr(&mut self, kind: u16, addr: IpAddr) -> Result<&mut Self> {
        match addr {
            IpAddr::V4(a) => self.put(kind, &a.octets()),
            IpAddr::V6(a) => self.put(kind, &a.octets()),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
