// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identities and multicast group membership.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{NlError, Result};
use crate::wire::FrameHeader;

/// Number of multicast groups per protocol.
pub const MAX_GROUPS: u32 = 32;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Identity of a live endpoint (netlink port id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EndpointId(pub u32);

impl EndpointId {
    /// The module itself. Frames it originates carry sender 0.
    pub const KERNEL: EndpointId = EndpointId(0);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EndpointId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// A multicast group id in `0..32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u8);

impl GroupId {
    /// Link state changes.
    pub const LINK: GroupId = GroupId(1);
    /// IPv4 address changes.
    pub const IPV4_IFADDR: GroupId = GroupId(5);
    /// IPv4 route changes.
    pub const IPV4_ROUTE: GroupId = GroupId(7);
    /// IPv6 address changes.
    pub const IPV6_IFADDR: GroupId = GroupId(9);
    /// IPv6 route changes.
    pub const IPV6_ROUTE: GroupId = GroupId(11);
    /// Group used by the broadcast service.
    pub const APP: GroupId = GroupId(17);

    pub fn new(id: u32) -> Result<Self> {
        if id >= MAX_GROUPS {
            return Err(NlError::InvalidGroup(id));
        }
        Ok(Self(id as u8))
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }

    /// Bit for this group in a [`GroupSet`].
    pub fn mask(self) -> u32 {
        1 << self.0
    }

    /// Legacy bind-time mask bit, `1 << (id - 1)`. Group 0 has none.
    pub fn bind_mask(self) -> u32 {
        if self.0 == 0 {
            0
        } else {
            1 << (self.0 - 1)
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for GroupId {
    type Error = NlError;

    fn try_from(id: u32) -> Result<Self> {
        Self::new(id)
    }
}

/// Set of groups as a 32-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GroupSet(u32);

impl GroupSet {
    pub const EMPTY: GroupSet = GroupSet(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, group: GroupId) -> bool {
        let fresh = !self.contains(group);
        self.0 |= group.mask();
        fresh
    }

    pub fn remove(&mut self, group: GroupId) -> bool {
        let present = self.contains(group);
        self.0 &= !group.mask();
        present
    }

    pub fn contains(self, group: GroupId) -> bool {
        self.0 & group.mask() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = GroupId> {
        (0..MAX_GROUPS as u8)
            .map(GroupId)
            .filter(move |g| self.contains(*g))
    }
}

impl FromIterator<GroupId> for GroupSet {
    fn from_iter<I: IntoIterator<Item = GroupId>>(iter: I) -> Self {
        let mut set = GroupSet::EMPTY;
        for g in iter {
            set.insert(g);
        }
        set
    }
}

impl fmt::Display for GroupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.iter().map(|g| g.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Group membership table.
///
/// Not synchronized; transports wrap it in a lock and hand out snapshots
/// through [`AddressRegistry::members`].
#[derive(Debug, Default, Clone)]
pub struct AddressRegistry {
    groups: BTreeMap<GroupId, BTreeSet<EndpointId>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity a reply to `header` must be addressed to.
    pub fn reply_address_of(header: &FrameHeader) -> EndpointId {
        EndpointId(header.sender)
    }

    /// Add `id` to `group`. Returns `false` if it was already a member.
    pub fn subscribe(&mut self, id: EndpointId, group: GroupId) -> bool {
        let added = self.groups.entry(group).or_default().insert(id);
        if added {
            log::debug!("[registry] endpoint {} joined group {}", id, group);
        }
        added
    }

    /// Remove `id` from `group`. Returns `false` if it was not a member.
    pub fn unsubscribe(&mut self, id: EndpointId, group: GroupId) -> bool {
        let Some(members) = self.groups.get_mut(&group) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.groups.remove(&group);
        }
        if removed {
            log::debug!("[registry] endpoint {} left group {}", id, group);
        }
        removed
    }

    /// Drop every membership of a terminated endpoint.
    pub fn remove_endpoint(&mut self, id: EndpointId) -> GroupSet {
        let left = self.groups_of(id);
        for group in left.iter() {
            self.unsubscribe(id, group);
        }
        left
    }

    /// Point-in-time snapshot of `group`, sorted by identity.
    pub fn members(&self, group: GroupId) -> Vec<EndpointId> {
        self.groups
            .get(&group)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, id: EndpointId, group: GroupId) -> bool {
        self.groups.get(&group).is_some_and(|m| m.contains(&id))
    }

    pub fn groups_of(&self, id: EndpointId) -> GroupSet {
        self.groups
            .iter()
            .filter(|(_, m)| m.contains(&id))
            .map(|(g, _)| *g)
            .collect()
    }

    /// Groups with at least one member.
    pub fn active_groups(&self) -> GroupSet {
        self.groups.keys().copied().collect()
    }
}
