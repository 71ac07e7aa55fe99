use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::address::Address;
use crate::cidr::Cidr;
use crate::error::{IpamError, Result};
use crate::group::{Group, Host};
use crate::ids::{GroupId, HostId};
use crate::network::Network;

/// One `{"name":..., "cidr":..., "block_mask":..., "tenants":[...]}` entry of the topology
/// document's `networks` array.
#[derive(Debug, Clone)]
pub struct ParsedNetwork {
    pub name: String,
    pub cidr: Cidr,
    pub block_mask: u8,
    pub tenants: HashSet<String>,
}

/// A host leaf entry: `{"name":..., "ip":...}`.
#[derive(Debug, Clone)]
pub struct ParsedHost {
    pub name: String,
    pub ip: Address,
}

/// One node of the recursive group tree declared under `map` or a nested `groups` array. A
/// node is internal if its own `groups` array contains further group specs, or a leaf if that
/// array contains `{name, ip}` host entries (or is empty).
#[derive(Debug, Clone)]
pub enum ParsedGroupNode {
    Internal {
        routing: String,
        assignment: HashMap<String, String>,
        children: Vec<ParsedGroupNode>,
    },
    Leaf {
        routing: String,
        assignment: HashMap<String, String>,
        hosts: Vec<ParsedHost>,
    },
}

impl ParsedGroupNode {
    pub fn routing(&self) -> &str {
        match self {
            ParsedGroupNode::Internal { routing, .. } => routing,
            ParsedGroupNode::Leaf { routing, .. } => routing,
        }
    }

    pub fn assignment(&self) -> &HashMap<String, String> {
        match self {
            ParsedGroupNode::Internal { assignment, .. } => assignment,
            ParsedGroupNode::Leaf { assignment, .. } => assignment,
        }
    }
}

/// One `topologies[]` entry: the set of networks it applies to, plus the root children.
#[derive(Debug, Clone)]
pub struct ParsedTopologyEntry {
    pub networks: Vec<String>,
    pub map: Vec<ParsedGroupNode>,
}

/// A fully-parsed topology document, ready to be materialized into `Network`s.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub networks: Vec<ParsedNetwork>,
    pub topologies: Vec<ParsedTopologyEntry>,
}

#[derive(Deserialize)]
struct RawDocument {
    networks: Vec<RawNetwork>,
    #[serde(default)]
    topologies: Vec<RawTopologyEntry>,
}

#[derive(Deserialize)]
struct RawNetwork {
    name: String,
    cidr: String,
    block_mask: u8,
    #[serde(default)]
    tenants: Vec<String>,
}

#[derive(Deserialize)]
struct RawTopologyEntry {
    networks: Vec<String>,
    #[serde(default)]
    map: Vec<Value>,
}

#[derive(Deserialize)]
struct RawGroupSpec {
    #[serde(default)]
    routing: String,
    #[serde(default)]
    assignment: HashMap<String, String>,
    #[serde(default)]
    groups: Vec<Value>,
}

#[derive(Deserialize)]
struct RawHostSpec {
    name: String,
    ip: String,
}

/// Parse a topology document from its JSON text form (§6).
pub fn parse_document(json: &str) -> Result<ParsedDocument> {
    let raw: RawDocument = serde_json::from_str(json)
        .map_err(|e| IpamError::invalid_topology(format!("malformed JSON: {e}")))?;

    let mut networks = Vec::with_capacity(raw.networks.len());
    for n in raw.networks {
        let cidr: Cidr = n
            .cidr
            .parse()
            .map_err(|_: IpamError| IpamError::invalid_topology(format!("bad cidr for network {}: {}", n.name, n.cidr)))?;
        networks.push(ParsedNetwork {
            name: n.name,
            cidr,
            block_mask: n.block_mask,
            tenants: n.tenants.into_iter().collect(),
        });
    }

    let mut topologies = Vec::with_capacity(raw.topologies.len());
    for t in raw.topologies {
        let map = t
            .map
            .iter()
            .map(parse_group_spec)
            .collect::<Result<Vec<_>>>()?;
        topologies.push(ParsedTopologyEntry {
            networks: t.networks,
            map,
        });
    }

    Ok(ParsedDocument { networks, topologies })
}

fn parse_group_spec(value: &Value) -> Result<ParsedGroupNode> {
    let raw: RawGroupSpec = serde_json::from_value(value.clone())
        .map_err(|e| IpamError::invalid_topology(format!("malformed group spec: {e}")))?;

    if raw.groups.is_empty() {
        return Ok(ParsedGroupNode::Leaf {
            routing: raw.routing,
            assignment: raw.assignment,
            hosts: Vec::new(),
        });
    }

    // Peek at the first child to decide whether `groups` holds host leaves or sub-groups.
    let first = &raw.groups[0];
    let looks_like_host = first.get("name").is_some() && first.get("ip").is_some();

    if looks_like_host {
        let mut hosts = Vec::with_capacity(raw.groups.len());
        for h in &raw.groups {
            let raw_host: RawHostSpec = serde_json::from_value(h.clone())
                .map_err(|e| IpamError::invalid_topology(format!("malformed host entry: {e}")))?;
            let ip: Address = raw_host
                .ip
                .parse()
                .map_err(|_: IpamError| IpamError::invalid_topology(format!("bad host ip: {}", raw_host.ip)))?;
            hosts.push(ParsedHost { name: raw_host.name, ip });
        }
        Ok(ParsedGroupNode::Leaf {
            routing: raw.routing,
            assignment: raw.assignment,
            hosts,
        })
    } else {
        let children = raw
            .groups
            .iter()
            .map(parse_group_spec)
            .collect::<Result<Vec<_>>>()?;
        Ok(ParsedGroupNode::Internal {
            routing: raw.routing,
            assignment: raw.assignment,
            children,
        })
    }
}

/// The CIDR ranges assigned to `k` declared children of `parent`, per §4.3:
/// `k=1` inherits the whole range, `k=2` splits in half, `k>2` splits into the smallest
/// power-of-two number of equal slots that covers `k` and assigns the first `k` in order
/// (remaining slots are reserved but unassigned).
pub fn child_cidrs(parent: Cidr, k: usize) -> Result<Vec<Cidr>> {
    match k {
        0 => Ok(Vec::new()),
        1 => Ok(vec![parent]),
        _ => {
            let bits = bits_for(k);
            let slots = parent.split_into(bits)?;
            Ok(slots.into_iter().take(k).collect())
        }
    }
}

fn bits_for(k: usize) -> u32 {
    let mut bits = 0u32;
    while (1usize << bits) < k {
        bits += 1;
    }
    bits
}

/// Build fresh, empty Networks from a parsed document and materialize every topology entry's
/// Group tree into the networks it names.
pub fn build_networks(doc: &ParsedDocument) -> Result<Vec<Network>> {
    let mut networks = Vec::with_capacity(doc.networks.len());
    for n in &doc.networks {
        networks.push(Network::new(n.name.clone(), n.cidr, n.block_mask, n.tenants.clone())?);
    }
    for entry in &doc.topologies {
        for net_name in &entry.networks {
            let idx = networks
                .iter()
                .position(|n| &n.name == net_name)
                .ok_or_else(|| IpamError::invalid_topology(format!("topology references unknown network {net_name}")))?;
            materialize_into(&mut networks[idx], &entry.map)?;
        }
    }
    validate_unique_host_names(&networks)?;
    Ok(networks)
}

/// Reject if any two Networks' host arenas assign the same name to a live host. Host names are
/// unique across the whole allocator (§3), not just within one Network.
pub fn validate_unique_host_names(networks: &[Network]) -> Result<()> {
    let mut seen = HashSet::new();
    for net in networks {
        for (i, host) in net.hosts.iter().enumerate() {
            if net.removed_hosts.contains(&HostId(i)) {
                continue;
            }
            if !seen.insert(host.name.as_str()) {
                return Err(IpamError::duplicate_host(host.name.clone()));
            }
        }
    }
    Ok(())
}

/// Rebuild `network`'s Group and Host arenas from `map`, treating it as the root's children.
/// Does not touch `network.blocks`; callers that reshape a network with existing blocks must
/// re-attach them afterward (see `Network::reattach_all_blocks`).
pub fn materialize_into(network: &mut Network, map: &[ParsedGroupNode]) -> Result<()> {
    network.groups.clear();
    network.hosts.clear();
    network.removed_hosts.clear();
    let root_cidr = network.cidr;
    network.groups.push(Group::new_internal(root_cidr, None, String::new()));
    network.root = GroupId(0);
    build_children(network, GroupId(0), root_cidr, map)?;
    Ok(())
}

fn build_children(
    network: &mut Network,
    parent: GroupId,
    parent_cidr: Cidr,
    specs: &[ParsedGroupNode],
) -> Result<()> {
    let cidrs = child_cidrs(parent_cidr, specs.len())?;
    let mut child_ids = Vec::with_capacity(specs.len());
    for (child_cidr, spec) in cidrs.into_iter().zip(specs.iter()) {
        let id = GroupId(network.groups.len());
        match spec {
            ParsedGroupNode::Leaf { routing, assignment, hosts } => {
                network.groups.push(Group::new_leaf(child_cidr, Some(parent), routing.clone()));
                network.group_mut(id).assignment = assignment.clone();
                for h in hosts {
                    network.push_host(Host {
                        name: h.name.clone(),
                        ip: h.ip,
                        group: id,
                    });
                }
            }
            ParsedGroupNode::Internal { routing, assignment, children } => {
                network.groups.push(Group::new_internal(child_cidr, Some(parent), routing.clone()));
                network.group_mut(id).assignment = assignment.clone();
                build_children(network, id, child_cidr, children)?;
            }
        }
        child_ids.push(id);
    }
    if let crate::group::GroupKind::Internal { children } = &mut network.group_mut(parent).kind {
        *children = child_ids;
    }
    Ok(())
}

/// Compute the leaf CIDRs a `map` would produce under `cidr`, without building an arena.
/// Used to validate a Group-tree reshape against a network's existing blocks before committing
/// to it.
pub fn leaves_with_spec<'a>(cidr: Cidr, map: &'a [ParsedGroupNode]) -> Result<Vec<(Cidr, &'a ParsedGroupNode)>> {
    let mut out = Vec::new();
    collect_leaves_with_spec(cidr, map, &mut out)?;
    Ok(out)
}

fn collect_leaves_with_spec<'a>(
    cidr: Cidr,
    specs: &'a [ParsedGroupNode],
    out: &mut Vec<(Cidr, &'a ParsedGroupNode)>,
) -> Result<()> {
    let cidrs = child_cidrs(cidr, specs.len())?;
    for (child_cidr, spec) in cidrs.into_iter().zip(specs.iter()) {
        match spec {
            ParsedGroupNode::Leaf { .. } => out.push((child_cidr, spec)),
            ParsedGroupNode::Internal { children, .. } => collect_leaves_with_spec(child_cidr, children, out)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_cidrs_k1_inherits_whole_range() {
        let parent: Cidr = "10.0.0.0/24".parse().unwrap();
        let kids = child_cidrs(parent, 1).unwrap();
        assert_eq!(kids, vec![parent]);
    }

    #[test]
    fn child_cidrs_k2_splits_in_half() {
        let parent: Cidr = "10.0.0.0/24".parse().unwrap();
        let kids = child_cidrs(parent, 2).unwrap();
        assert_eq!(kids[0].to_string(), "10.0.0.0/25");
        assert_eq!(kids[1].to_string(), "10.0.0.128/25");
    }

    #[test]
    fn child_cidrs_k3_uses_four_slots_first_three() {
        let parent: Cidr = "10.0.0.0/24".parse().unwrap();
        let kids = child_cidrs(parent, 3).unwrap();
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[0].to_string(), "10.0.0.0/26");
        assert_eq!(kids[1].to_string(), "10.0.0.64/26");
        assert_eq!(kids[2].to_string(), "10.0.0.128/26");
        // the fourth slot, 10.0.0.192/26, is left unassigned
    }

    #[test]
    fn parses_minimal_document() {
        let doc = r#"{
            "networks": [{"name":"n1","cidr":"10.0.0.0/24","block_mask":30}],
            "topologies": [{"networks":["n1"],"map":[
                {"routing":"r1","groups":[{"name":"h1","ip":"10.0.0.1"}]}
            ]}]
        }"#;
        let parsed = parse_document(doc).unwrap();
        assert_eq!(parsed.networks.len(), 1);
        assert_eq!(parsed.networks[0].name, "n1");
        assert_eq!(parsed.topologies[0].map.len(), 1);
        match &parsed.topologies[0].map[0] {
            ParsedGroupNode::Leaf { hosts, routing, .. } => {
                assert_eq!(routing, "r1");
                assert_eq!(hosts.len(), 1);
                assert_eq!(hosts[0].name, "h1");
            }
            ParsedGroupNode::Internal { .. } => panic!("expected a leaf"),
        }
    }

    #[test]
    fn parses_nested_groups() {
        let doc = r#"{
            "networks": [{"name":"n1","cidr":"10.0.0.0/16","block_mask":30}],
            "topologies": [{"networks":["n1"],"map":[
                {"routing":"top","groups":[
                    {"routing":"left","groups":[{"name":"h1","ip":"10.0.0.1"}]},
                    {"routing":"right","groups":[{"name":"h2","ip":"10.0.1.1"}]}
                ]}
            ]}]
        }"#;
        let parsed = parse_document(doc).unwrap();
        match &parsed.topologies[0].map[0] {
            ParsedGroupNode::Internal { children, routing, .. } => {
                assert_eq!(routing, "top");
                assert_eq!(children.len(), 2);
            }
            ParsedGroupNode::Leaf { .. } => panic!("expected internal"),
        }
    }
}
