use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::cidr::Cidr;
use crate::error::{IpamError, Result};
use crate::group::{Group, GroupKind, Host};
use crate::ids::{BlockId, GroupId, HostId};

/// A named top-level CIDR range, partitioned by a Group tree and carved into Blocks.
///
/// Groups, Hosts, and Blocks are arena-allocated inside the Network (flat `Vec`s indexed by
/// `GroupId`/`HostId`/`BlockId`) rather than owned through pointers, per the arena design note:
/// it keeps the tree serializable and avoids an ownership cycle between a Group and its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub cidr: Cidr,
    pub block_mask: u8,
    /// Empty means wildcard: any tenant may allocate here.
    pub allowed_tenants: HashSet<String>,
    pub groups: Vec<Group>,
    pub hosts: Vec<Host>,
    /// Hosts logically removed by `remove_host`. Entries are tombstoned rather than shifted out
    /// of `hosts` so existing `HostId`s (held by owner records and Group host lists) stay valid.
    pub removed_hosts: HashSet<HostId>,
    pub blocks: Vec<Block>,
    pub root: GroupId,
    pub blackouts: Vec<Cidr>,
    pub revision: u64,
}

impl Network {
    pub fn new(
        name: impl Into<String>,
        cidr: Cidr,
        block_mask: u8,
        allowed_tenants: HashSet<String>,
    ) -> Result<Self> {
        let name = name.into();
        if block_mask < cidr.length() || block_mask > 32 {
            return Err(IpamError::bad_block_mask(name, block_mask, cidr.length()));
        }
        let root = Group::new_leaf(cidr, None, String::new());
        Ok(Self {
            name,
            cidr,
            block_mask,
            allowed_tenants,
            groups: vec![root],
            hosts: Vec::new(),
            removed_hosts: HashSet::new(),
            blocks: Vec::new(),
            root: GroupId(0),
            blackouts: Vec::new(),
            revision: 0,
        })
    }

    pub fn allows_tenant(&self, tenant: &str) -> bool {
        self.allowed_tenants.is_empty() || self.allowed_tenants.contains(tenant)
    }

    pub fn is_wildcard(&self) -> bool {
        self.allowed_tenants.is_empty()
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.index()]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.index()]
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// The live (non-removed) host named `name` in this Network's own arena, if any. A removed
    /// host's name becomes available for reuse. Host names are unique across the whole
    /// allocator (§3), not just within one Network, so callers enforcing that invariant must
    /// check every Network via [`find_host_globally`], not this method alone.
    pub fn find_host(&self, name: &str) -> Option<HostId> {
        self.hosts
            .iter()
            .enumerate()
            .find(|(i, h)| h.name == name && !self.removed_hosts.contains(&HostId(*i)))
            .map(|(i, _)| HostId(i))
    }

    fn live_host_count(&self, leaf: GroupId) -> usize {
        self.group(leaf)
            .hosts()
            .iter()
            .filter(|h| !self.removed_hosts.contains(h))
            .count()
    }

    /// Path of group ids from the root down to `leaf`, root first.
    pub fn path_to_root(&self, leaf: GroupId) -> Vec<GroupId> {
        let mut path = vec![leaf];
        let mut current = leaf;
        while let Some(parent) = self.group(current).parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Leaf groups reachable from the root, in declaration order.
    pub fn leaves(&self) -> Vec<GroupId> {
        let mut out = Vec::new();
        self.collect_leaves(self.root, &mut out);
        out
    }

    fn collect_leaves(&self, id: GroupId, out: &mut Vec<GroupId>) {
        let g = self.group(id);
        match &g.kind {
            GroupKind::Leaf { .. } => out.push(id),
            GroupKind::Internal { children } => {
                for &child in children {
                    self.collect_leaves(child, out);
                }
            }
        }
    }

    /// Leaf with the fewest hosts, ties broken by first-declared order (§4.3).
    pub fn emptiest_leaf(&self) -> Option<GroupId> {
        self.leaves()
            .into_iter()
            .min_by_key(|&id| self.live_host_count(id))
    }

    /// Append a block to the arena and register it on `leaf`. Returns the new block's id.
    pub fn push_block(&mut self, leaf: GroupId, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        self.group_mut(leaf).blocks_mut().push(id);
        id
    }

    pub fn push_host(&mut self, host: Host) -> HostId {
        let id = HostId(self.hosts.len());
        let group = host.group;
        self.hosts.push(host);
        self.group_mut(group).hosts_mut().push(id);
        id
    }

    /// Merge `new` into the blackout registry per the broadening rule: drop every existing
    /// entry strictly contained by `new`; if an existing entry contains `new`, the call is a
    /// no-op. Returns `true` if the registry changed.
    pub fn merge_insert_blackout(&mut self, new: Cidr) -> bool {
        if self.blackouts.iter().any(|existing| existing.contains(&new)) {
            return false;
        }
        self.blackouts.retain(|existing| !new.contains(existing));
        self.blackouts.push(new);
        true
    }

    /// Remove an exact match from the registry.
    pub fn remove_blackout(&mut self, cidr: &Cidr) -> Result<()> {
        let before = self.blackouts.len();
        self.blackouts.retain(|b| b != cidr);
        if self.blackouts.len() == before {
            return Err(IpamError::no_such_blackout(self.name.clone(), cidr.to_string()));
        }
        Ok(())
    }

    /// Recompute every block's bitmap from scratch: the bits a live owner holds, unioned with
    /// the mask implied by the current blackout registry. `allocated` maps each block id to the
    /// bit offsets currently claimed by owners (as opposed to blackout masking). Each touched
    /// block bumps its own `revision` if its bitmap actually changes (`Block::recompute_mask`);
    /// this only bumps the Network-level `revision`, once, for the call as a whole.
    pub fn remask_all_blocks(&mut self, allocated: &HashMap<BlockId, Vec<usize>>) {
        let blackouts = self.blackouts.clone();
        for (idx, block) in self.blocks.iter_mut().enumerate() {
            let offsets = allocated.get(&BlockId(idx)).map(Vec::as_slice).unwrap_or(&[]);
            block.recompute_mask(offsets, &blackouts);
        }
    }

    /// Apply the current blackout registry to every existing block (used right after a
    /// successful `blackout()` call, additive only — never clears bits). Each touched block
    /// bumps its own `revision` if a bit actually flips (`Block::mask_blackout`); this only
    /// bumps the Network-level `revision`, once, for the call as a whole.
    pub fn mask_blackout_into_all_blocks(&mut self, new: &Cidr) {
        for block in &mut self.blocks {
            block.mask_blackout(new);
        }
    }

    /// After a Group-tree reshape, re-register every existing Block on whichever new leaf
    /// group's CIDR contains it. Errors if a block no longer fits under any leaf, which would
    /// mean the reshape straddled it (callers are expected to have already validated this).
    pub fn reattach_all_blocks(&mut self) -> Result<()> {
        let leaves = self.leaves();
        for idx in 0..self.blocks.len() {
            let block_cidr = self.blocks[idx].cidr;
            let leaf = leaves.iter().copied().find(|&l| self.group(l).cidr.contains(&block_cidr));
            match leaf {
                Some(l) => self.group_mut(l).blocks_mut().push(BlockId(idx)),
                None => {
                    return Err(IpamError::topology_conflict(format!(
                        "block {} in network {} has no containing leaf after topology update",
                        block_cidr, self.name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// The network index and host id of the live host named `name`, searching every Network in
/// `networks` in order. Host names are unique across the whole allocator (§3): a match is never
/// expected in more than one Network.
pub fn find_host_globally(networks: &[Network], name: &str) -> Option<(usize, HostId)> {
    networks
        .iter()
        .enumerate()
        .find_map(|(i, n)| n.find_host(name).map(|hid| (i, hid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn new_network_rejects_bad_block_mask() {
        let err = Network::new("n1", cidr("10.0.0.0/24"), 20, HashSet::new()).unwrap_err();
        assert!(matches!(err, IpamError::BadBlockMask { .. }));
    }

    #[test]
    fn wildcard_allows_any_tenant() {
        let net = Network::new("n1", cidr("10.0.0.0/24"), 30, HashSet::new()).unwrap();
        assert!(net.allows_tenant("anything"));
    }

    #[test]
    fn explicit_tenants_gate_access() {
        let mut tenants = HashSet::new();
        tenants.insert("t1".to_string());
        let net = Network::new("n1", cidr("10.0.0.0/24"), 30, tenants).unwrap();
        assert!(net.allows_tenant("t1"));
        assert!(!net.allows_tenant("t2"));
    }

    #[test]
    fn blackout_broadening_merge() {
        let mut net = Network::new("n1", cidr("10.0.0.0/30"), 30, HashSet::new()).unwrap();
        assert!(net.merge_insert_blackout(cidr("10.0.0.0/32")));
        assert_eq!(net.blackouts.len(), 1);
        // broader blackout absorbs the narrower one
        assert!(net.merge_insert_blackout(cidr("10.0.0.0/31")));
        assert_eq!(net.blackouts, vec![cidr("10.0.0.0/31")]);
        // a narrower one inside an existing broader one is a no-op
        assert!(!net.merge_insert_blackout(cidr("10.0.0.0/32")));
        assert_eq!(net.blackouts, vec![cidr("10.0.0.0/31")]);
    }

    #[test]
    fn remove_blackout_requires_exact_match() {
        let mut net = Network::new("n1", cidr("10.0.0.0/30"), 30, HashSet::new()).unwrap();
        net.merge_insert_blackout(cidr("10.0.0.0/31"));
        assert!(net.remove_blackout(&cidr("10.0.0.0/32")).is_err());
        assert!(net.remove_blackout(&cidr("10.0.0.0/31")).is_ok());
        assert!(net.blackouts.is_empty());
    }

    #[test]
    fn find_host_globally_searches_every_network() {
        let n1 = Network::new("n1", cidr("10.0.0.0/24"), 30, HashSet::new()).unwrap();
        let mut n2 = Network::new("n2", cidr("10.1.0.0/24"), 30, HashSet::new()).unwrap();
        n2.push_host(Host {
            name: "h1".to_string(),
            ip: "10.1.0.1".parse().unwrap(),
            group: n2.root,
        });
        let networks = vec![n1, n2];
        assert!(find_host_globally(&networks, "nope").is_none());
        let (idx, _) = find_host_globally(&networks, "h1").unwrap();
        assert_eq!(idx, 1);
    }
}
