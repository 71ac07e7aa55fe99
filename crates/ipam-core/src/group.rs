use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cidr::Cidr;
use crate::ids::{BlockId, GroupId, HostId};

/// A host: a physical/virtual node identified by a globally-unique name. Its admin IP is
/// read-only after `add_host` and is never drawn from the IPAM pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub ip: Address,
    pub group: GroupId,
}

/// The two shapes a [`Group`] can take. Modeled as a tagged variant rather than via
/// inheritance, dispatched on the tag at every call site that needs to know which shape it
/// has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupKind {
    /// An internal node: an ordered list of child groups, in declaration order.
    Internal { children: Vec<GroupId> },
    /// A leaf: the hosts that live here, and the blocks carved from this leaf's CIDR (indices
    /// into the owning [`crate::network::Network`]'s block arena).
    Leaf {
        hosts: Vec<HostId>,
        blocks: Vec<BlockId>,
    },
}

/// A node in a Network's partition tree.
///
/// Groups are arena-allocated inside their owning Network (`Network::groups: Vec<Group>`) and
/// referred to by [`GroupId`] rather than by owning pointer, so a Group can hold a parent
/// back-link without an ownership cycle and the whole tree serializes as a flat vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub cidr: Cidr,
    pub parent: Option<GroupId>,
    /// Opaque tag copied onto every block allocated within this group; interpreted by
    /// downstream consumers (BGP announcer, VPC controller), never validated here.
    pub routing: String,
    /// Free-form metadata copied into block metadata at allocation time.
    pub assignment: HashMap<String, String>,
    pub kind: GroupKind,
}

impl Group {
    pub fn new_internal(cidr: Cidr, parent: Option<GroupId>, routing: String) -> Self {
        Self {
            cidr,
            parent,
            routing,
            assignment: HashMap::new(),
            kind: GroupKind::Internal { children: Vec::new() },
        }
    }

    pub fn new_leaf(cidr: Cidr, parent: Option<GroupId>, routing: String) -> Self {
        Self {
            cidr,
            parent,
            routing,
            assignment: HashMap::new(),
            kind: GroupKind::Leaf {
                hosts: Vec::new(),
                blocks: Vec::new(),
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, GroupKind::Leaf { .. })
    }

    pub fn children(&self) -> &[GroupId] {
        match &self.kind {
            GroupKind::Internal { children } => children,
            GroupKind::Leaf { .. } => &[],
        }
    }

    pub fn hosts(&self) -> &[HostId] {
        match &self.kind {
            GroupKind::Leaf { hosts, .. } => hosts,
            GroupKind::Internal { .. } => &[],
        }
    }

    pub fn blocks(&self) -> &[BlockId] {
        match &self.kind {
            GroupKind::Leaf { blocks, .. } => blocks,
            GroupKind::Internal { .. } => &[],
        }
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<BlockId> {
        match &mut self.kind {
            GroupKind::Leaf { blocks, .. } => blocks,
            GroupKind::Internal { .. } => panic!("blocks_mut called on an internal group"),
        }
    }

    pub fn hosts_mut(&mut self) -> &mut Vec<HostId> {
        match &mut self.kind {
            GroupKind::Leaf { hosts, .. } => hosts,
            GroupKind::Internal { .. } => panic!("hosts_mut called on an internal group"),
        }
    }
}
