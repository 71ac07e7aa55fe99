use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::block::Block;
use crate::cidr::Cidr;
use crate::config::AllocatorConfig;
use crate::error::{IpamError, Result};
use crate::group::Host;
use crate::ids::{BlockId, GroupId};
use crate::network::{self, Network};
use crate::owner::OwnerRecord;
use crate::saver::{Saver, Snapshot};
use crate::topology::{self, ParsedDocument};

#[derive(Debug, Clone)]
struct AllocatorState {
    networks: Vec<Network>,
    owners: HashMap<String, OwnerRecord>,
}

/// Top-level IPAM operations, behind a single `parking_lot::RwLock` covering all mutable
/// state (§5): mutations take the exclusive side, read-only queries take the shared side.
pub struct Allocator<S: Saver> {
    state: RwLock<AllocatorState>,
    saver: S,
    config: AllocatorConfig,
}

/// Point-in-time summary of one Network, as returned by `list_networks` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub name: String,
    pub cidr: Cidr,
    pub block_mask: u8,
    pub revision: u64,
    pub block_count: usize,
    pub host_count: usize,
    pub blackout_count: usize,
}

/// Point-in-time summary of one Block, as returned by `list_blocks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub cidr: Cidr,
    pub tenant: String,
    pub segment: String,
    pub revision: u64,
    pub allocated: usize,
    pub capacity: usize,
}

impl<S: Saver> Allocator<S> {
    pub fn new(networks: Vec<Network>, saver: S) -> Self {
        Self::with_config(networks, saver, AllocatorConfig::default())
    }

    /// Like [`Allocator::new`], with explicit tuning.
    pub fn with_config(networks: Vec<Network>, saver: S, config: AllocatorConfig) -> Self {
        Self {
            state: RwLock::new(AllocatorState {
                networks,
                owners: HashMap::new(),
            }),
            saver,
            config,
        }
    }

    /// Build a fresh Allocator from a topology document (§6).
    pub fn from_topology(doc: &ParsedDocument, saver: S) -> Result<Self> {
        let networks = topology::build_networks(doc)?;
        Ok(Self::new(networks, saver))
    }

    /// Like [`Allocator::from_topology`], with explicit tuning.
    pub fn from_topology_with_config(
        doc: &ParsedDocument,
        saver: S,
        config: AllocatorConfig,
    ) -> Result<Self> {
        let networks = topology::build_networks(doc)?;
        Ok(Self::with_config(networks, saver, config))
    }

    /// Replace the saver snapshot and re-validate it's in sync with the saver. Invokes `save`
    /// on the live state, rolling back to `before` if it fails.
    fn commit(&self, guard: &mut AllocatorState, before: AllocatorState) -> Result<()> {
        let snapshot = Snapshot {
            networks: guard.networks.clone(),
            owners: guard.owners.clone(),
        };
        let started = std::time::Instant::now();
        let result = self.saver.save(&snapshot);
        let elapsed = started.elapsed();
        if elapsed > self.config.slow_save_threshold {
            warn!(?elapsed, threshold = ?self.config.slow_save_threshold, "saver took longer than the configured threshold");
        }
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("saver rejected mutation, rolling back: {e}");
                *guard = before;
                Err(IpamError::save_failed("saver rejected snapshot", Some(e)))
            }
        }
    }

    /// (§4.6) Allocate an address for `host_name` under `(tenant, segment)`, recorded against
    /// `owner_token`.
    pub fn allocate(
        &self,
        owner_token: &str,
        host_name: &str,
        tenant: &str,
        segment: &str,
    ) -> Result<Address> {
        let mut guard = self.state.write();

        if guard.owners.contains_key(owner_token) {
            return Err(IpamError::duplicate_owner(owner_token));
        }

        // Host names are unique across the whole allocator (§3, enforced by `add_host` and
        // topology construction/update), so this can resolve in at most one network.
        let (net_idx, host_id) = network::find_host_globally(&guard.networks, host_name)
            .ok_or_else(|| IpamError::unknown_host(host_name))?;

        let mut candidates = Vec::new();
        let net = &guard.networks[net_idx];
        if net.allows_tenant(tenant) {
            candidates.push((net_idx, host_id));
        }
        if candidates.is_empty() {
            return Err(IpamError::no_available_ip(format!(
                "no network allows tenant {tenant} for host {host_name}"
            )));
        }

        let before = guard.clone();
        let mut last_reason = String::from("no candidate network was tried");
        for (net_idx, host_id) in candidates {
            let leaf = guard.networks[net_idx].host(host_id).group;
            let block_mask = guard.networks[net_idx].block_mask;
            match allocate_in_leaf(
                &mut guard.networks[net_idx],
                leaf,
                tenant,
                segment,
                block_mask,
                &self.config,
            ) {
                Ok((block_id, offset)) => {
                    let network_name = guard.networks[net_idx].name.clone();
                    let address = guard.networks[net_idx]
                        .block(block_id)
                        .cidr
                        .address_at(offset as u64)
                        .expect("offset returned by allocate_in_leaf is within the block's cidr");
                    guard.owners.insert(
                        owner_token.to_string(),
                        OwnerRecord {
                            owner_token: owner_token.to_string(),
                            network: network_name.clone(),
                            address,
                            block: block_id,
                            offset,
                            host: host_id,
                        },
                    );
                    self.commit(&mut guard, before)?;
                    info!(owner = owner_token, network = %network_name, %address, "allocated address");
                    return Ok(address);
                }
                Err(e) => last_reason = e.to_string(),
            }
        }

        Err(IpamError::no_available_ip(format!(
            "exhausted every eligible network; last reason: {last_reason}"
        )))
    }

    /// (§4.6) Release the address held by `owner_token`.
    pub fn deallocate(&self, owner_token: &str) -> Result<()> {
        let mut guard = self.state.write();
        let record = guard
            .owners
            .get(owner_token)
            .cloned()
            .ok_or_else(|| IpamError::unknown_owner(owner_token))?;

        let before = guard.clone();
        let net_idx = guard
            .networks
            .iter()
            .position(|n| n.name == record.network)
            .expect("owner record references a network that exists");
        guard.networks[net_idx].block_mut(record.block).release(record.offset)?;
        guard.owners.remove(owner_token);
        self.commit(&mut guard, before)?;
        debug!(owner = owner_token, "deallocated address");
        Ok(())
    }

    /// (§4.5) Reserve `cidr` as unavailable.
    pub fn blackout(&self, cidr: Cidr) -> Result<()> {
        let mut guard = self.state.write();
        let net_idx = guard
            .networks
            .iter()
            .position(|n| n.cidr.contains(&cidr))
            .ok_or_else(|| IpamError::no_containing_network(cidr.to_string()))?;

        if cidr.contains(&guard.networks[net_idx].cidr) {
            return Err(IpamError::cannot_blackout_entire_network(
                guard.networks[net_idx].name.clone(),
            ));
        }

        let network_name = guard.networks[net_idx].name.clone();
        let collides = guard
            .owners
            .values()
            .any(|o| o.network == network_name && cidr.contains_address(o.address));
        if collides {
            return Err(IpamError::blackout_collides_with_allocation(network_name, cidr.to_string()));
        }

        let before = guard.clone();
        let changed = guard.networks[net_idx].merge_insert_blackout(cidr);
        if !changed {
            debug!(network = %network_name, %cidr, "blackout absorbed by an existing, broader entry");
            return Ok(());
        }
        guard.networks[net_idx].mask_blackout_into_all_blocks(&cidr);
        guard.networks[net_idx].revision += 1;
        self.commit(&mut guard, before)?;
        info!(network = %network_name, %cidr, "applied blackout");
        Ok(())
    }

    /// (§4.5) Remove a previously-applied blackout, exact match required.
    pub fn unblackout(&self, cidr: Cidr) -> Result<()> {
        let mut guard = self.state.write();
        let net_idx = guard
            .networks
            .iter()
            .position(|n| n.cidr.contains(&cidr))
            .ok_or_else(|| IpamError::no_containing_network(cidr.to_string()))?;

        let before = guard.clone();
        guard.networks[net_idx].remove_blackout(&cidr)?;

        let network_name = guard.networks[net_idx].name.clone();
        let mut allocated: HashMap<BlockId, Vec<usize>> = HashMap::new();
        for o in guard.owners.values().filter(|o| o.network == network_name) {
            allocated.entry(o.block).or_default().push(o.offset);
        }
        guard.networks[net_idx].remask_all_blocks(&allocated);
        guard.networks[net_idx].revision += 1;
        self.commit(&mut guard, before)?;
        info!(network = %network_name, %cidr, "removed blackout");
        Ok(())
    }

    /// (§4.8) Add a host to the emptiest leaf group of `network_name`.
    pub fn add_host(&self, network_name: &str, name: &str, ip: Address) -> Result<()> {
        let mut guard = self.state.write();
        let net_idx = guard
            .networks
            .iter()
            .position(|n| n.name == network_name)
            .ok_or_else(|| IpamError::invalid_topology(format!("unknown network {network_name}")))?;

        if network::find_host_globally(&guard.networks, name).is_some() {
            return Err(IpamError::duplicate_host(name));
        }
        let leaf = guard.networks[net_idx]
            .emptiest_leaf()
            .ok_or_else(|| IpamError::topology_conflict(format!("network {network_name} has no leaf group")))?;

        let before = guard.clone();
        guard.networks[net_idx].push_host(Host {
            name: name.to_string(),
            ip,
            group: leaf,
        });
        self.commit(&mut guard, before)?;
        debug!(network = network_name, host = name, "added host");
        Ok(())
    }

    /// (§4.8) Remove a host; fails if it has live allocations.
    pub fn remove_host(&self, network_name: &str, name: &str) -> Result<()> {
        let mut guard = self.state.write();
        let net_idx = guard
            .networks
            .iter()
            .position(|n| n.name == network_name)
            .ok_or_else(|| IpamError::unknown_host(name))?;
        let host_id = guard.networks[net_idx]
            .find_host(name)
            .ok_or_else(|| IpamError::unknown_host(name))?;

        let allocation_count = guard
            .owners
            .values()
            .filter(|o| o.network == network_name && o.host == host_id)
            .count();
        if allocation_count > 0 {
            return Err(IpamError::host_in_use(name, allocation_count));
        }

        let before = guard.clone();
        guard.networks[net_idx].removed_hosts.insert(host_id);
        self.commit(&mut guard, before)?;
        debug!(network = network_name, host = name, "removed host");
        Ok(())
    }

    /// (§4.7) Apply a new topology document, rejecting any change that would orphan a live
    /// allocation.
    pub fn update_topology(&self, doc: &ParsedDocument) -> Result<()> {
        let mut guard = self.state.write();
        let before = guard.clone();

        let desired_names: HashSet<&str> = doc.networks.iter().map(|n| n.name.as_str()).collect();

        for net in &guard.networks {
            if !desired_names.contains(net.name.as_str())
                && guard.owners.values().any(|o| o.network == net.name)
            {
                return Err(IpamError::topology_conflict(format!(
                    "network {} has live allocations and cannot be removed",
                    net.name
                )));
            }
        }

        let mut new_networks = Vec::with_capacity(doc.networks.len());
        for spec in &doc.networks {
            let existing_idx = guard.networks.iter().position(|n| n.name == spec.name);
            let net = match existing_idx {
                None => Network::new(spec.name.clone(), spec.cidr, spec.block_mask, spec.tenants.clone())?,
                Some(idx) => {
                    let existing = &guard.networks[idx];
                    let reshaped = existing.cidr != spec.cidr || existing.block_mask != spec.block_mask;
                    let has_owner = guard.owners.values().any(|o| o.network == spec.name);
                    if reshaped && has_owner {
                        return Err(IpamError::topology_conflict(format!(
                            "network {} changed cidr/block_mask but has live allocations",
                            spec.name
                        )));
                    }
                    if reshaped {
                        Network::new(spec.name.clone(), spec.cidr, spec.block_mask, spec.tenants.clone())?
                    } else {
                        let mut net = existing.clone();
                        net.allowed_tenants = spec.tenants.clone();
                        net
                    }
                }
            };
            new_networks.push(net);
        }

        for entry in &doc.topologies {
            for net_name in &entry.networks {
                let idx = new_networks
                    .iter()
                    .position(|n| &n.name == net_name)
                    .ok_or_else(|| IpamError::invalid_topology(format!("topology references unknown network {net_name}")))?;
                let net = &mut new_networks[idx];
                if net.blocks.is_empty() {
                    topology::materialize_into(net, &entry.map)?;
                } else {
                    let leaves = topology::leaves_with_spec(net.cidr, &entry.map)?;
                    for block in &net.blocks {
                        let straddles = !leaves.iter().any(|(leaf_cidr, _)| leaf_cidr.contains(&block.cidr));
                        if straddles {
                            return Err(IpamError::topology_conflict(format!(
                                "group-tree reshape under network {} would straddle block {}",
                                net.name, block.cidr
                            )));
                        }
                    }
                    topology::materialize_into(net, &entry.map)?;
                    net.reattach_all_blocks()?;
                }
            }
        }

        topology::validate_unique_host_names(&new_networks)?;

        guard.networks = new_networks;
        self.commit(&mut guard, before)?;
        info!("applied topology update");
        Ok(())
    }

    pub fn list_networks(&self) -> Vec<NetworkSummary> {
        let guard = self.state.read();
        guard
            .networks
            .iter()
            .map(|n| NetworkSummary {
                name: n.name.clone(),
                cidr: n.cidr,
                block_mask: n.block_mask,
                revision: n.revision,
                block_count: n.blocks.len(),
                host_count: n.hosts.len() - n.removed_hosts.len(),
                blackout_count: n.blackouts.len(),
            })
            .collect()
    }

    pub fn list_blocks(&self, network_name: &str) -> Result<Vec<BlockSummary>> {
        let guard = self.state.read();
        let net = guard
            .networks
            .iter()
            .find(|n| n.name == network_name)
            .ok_or_else(|| IpamError::invalid_topology(format!("unknown network {network_name}")))?;
        Ok(net
            .blocks
            .iter()
            .map(|b| BlockSummary {
                cidr: b.cidr,
                tenant: b.tenant.clone(),
                segment: b.segment.clone(),
                revision: b.revision,
                allocated: b.bitmap.popcount(),
                capacity: b.bitmap.len(),
            })
            .collect())
    }

    pub fn lookup_owner(&self, owner_token: &str) -> Option<OwnerRecord> {
        self.state.read().owners.get(owner_token).cloned()
    }

    /// A full, point-in-time copy of the allocator's state — the same shape handed to the
    /// Saver.
    pub fn snapshot(&self) -> Snapshot {
        let guard = self.state.read();
        Snapshot {
            networks: guard.networks.clone(),
            owners: guard.owners.clone(),
        }
    }

    /// Rebuild an Allocator from a previously-saved snapshot.
    pub fn from_snapshot(snapshot: Snapshot, saver: S) -> Self {
        Self::from_snapshot_with_config(snapshot, saver, AllocatorConfig::default())
    }

    /// Like [`Allocator::from_snapshot`], with explicit tuning.
    pub fn from_snapshot_with_config(snapshot: Snapshot, saver: S, config: AllocatorConfig) -> Self {
        Self {
            state: RwLock::new(AllocatorState {
                networks: snapshot.networks,
                owners: snapshot.owners,
            }),
            saver,
            config,
        }
    }
}

/// (§4.4) Allocate one address within `leaf`'s CIDR for `(tenant, segment)`. Tries block reuse
/// before a fresh carve unless `config.prefer_block_reuse` is `false`, in which case the two are
/// swapped; released-block reuse is always the last resort.
fn allocate_in_leaf(
    network: &mut Network,
    leaf: GroupId,
    tenant: &str,
    segment: &str,
    block_mask: u8,
    config: &AllocatorConfig,
) -> Result<(BlockId, usize)> {
    let reuse_first = config.prefer_block_reuse;

    if reuse_first {
        if let Some(block_id) = reuse_existing_block(network, leaf, tenant, segment) {
            let offset = network.block_mut(block_id).allocate()?;
            return Ok((block_id, offset));
        }
    }

    if let Some(cidr) = carve_fresh_block(network, leaf, block_mask) {
        let block = Block::new(cidr, tenant, segment);
        let block_id = network.push_block(leaf, block);
        for bo in network.blackouts.clone() {
            network.block_mut(block_id).mask_blackout(&bo);
        }
        let offset = network.block_mut(block_id).allocate()?;
        return Ok((block_id, offset));
    }

    if !reuse_first {
        if let Some(block_id) = reuse_existing_block(network, leaf, tenant, segment) {
            let offset = network.block_mut(block_id).allocate()?;
            return Ok((block_id, offset));
        }
    }

    if let Some(block_id) = reuse_released_block(network, leaf) {
        network.block_mut(block_id).retag(tenant, segment);
        let blackouts = network.blackouts.clone();
        network.block_mut(block_id).recompute_mask(&[], &blackouts);
        let offset = network.block_mut(block_id).allocate()?;
        return Ok((block_id, offset));
    }

    Err(IpamError::no_available_ip(format!(
        "leaf {} in network {} has no reusable, carvable, or released block",
        network.group(leaf).cidr,
        network.name
    )))
}

fn reuse_existing_block(
    network: &Network,
    leaf: GroupId,
    tenant: &str,
    segment: &str,
) -> Option<BlockId> {
    let mut candidates: Vec<BlockId> = network
        .group(leaf)
        .blocks()
        .iter()
        .copied()
        .filter(|&id| {
            let b = network.block(id);
            b.tenant_segment() == (tenant, segment) && !b.bitmap.all_set()
        })
        .collect();
    candidates.sort_by_key(|&id| network.block(id).cidr.start());
    candidates.into_iter().next()
}

fn carve_fresh_block(network: &Network, leaf: GroupId, block_mask: u8) -> Option<Cidr> {
    let leaf_cidr = network.group(leaf).cidr;
    if leaf_cidr.length() > block_mask {
        return None;
    }
    let bits = (block_mask - leaf_cidr.length()) as u32;
    let slots = leaf_cidr.split_into(bits).ok()?;

    let existing: Vec<Cidr> = network.group(leaf).blocks().iter().map(|&id| network.block(id).cidr).collect();

    slots.into_iter().find(|slot| {
        let overlaps_existing = existing.iter().any(|e| e.overlaps(slot));
        let fully_blacked = network.blackouts.iter().any(|b| b.contains(slot));
        let has_room = has_room_after_blackouts(*slot, &network.blackouts);
        !overlaps_existing && !fully_blacked && has_room
    })
}

fn reuse_released_block(network: &Network, leaf: GroupId) -> Option<BlockId> {
    let mut candidates: Vec<BlockId> = network
        .group(leaf)
        .blocks()
        .iter()
        .copied()
        .filter(|&id| network.block(id).is_fully_released())
        .collect();
    candidates.sort_by_key(|&id| network.block(id).cidr.start());
    candidates
        .into_iter()
        .find(|&id| has_room_after_blackouts(network.block(id).cidr, &network.blackouts))
}

fn has_room_after_blackouts(cidr: Cidr, blackouts: &[Cidr]) -> bool {
    (0..cidr.size()).any(|offset| {
        let addr = cidr.address_at(offset).expect("offset within cidr size");
        !blackouts.iter().any(|b| b.contains_address(addr))
    })
}
