//! Property-based checks for the invariants a correct Allocator must hold under arbitrary
//! interleavings of allocate/deallocate/blackout/topology operations (§8): the bitmap popcount
//! across all blocks always equals the number of live owners, every allocated address stays
//! inside its network, every blackout's bits stay set in every overlapping block, every
//! allocation lands in a network whose tenant allow-list actually permits it, and a
//! deallocate-then-reallocate with no intervening mutation reuses the same block.

use std::collections::HashSet;

use ipam_core::{parse_document, Allocator, NullSaver};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Alloc(u8),
    Dealloc(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Alloc),
        (0u8..8).prop_map(Op::Dealloc),
    ]
}

fn single_host_network() -> Allocator<NullSaver> {
    let doc = parse_document(
        r#"{
            "networks": [{"name":"n1","cidr":"10.0.0.0/24","block_mask":30}],
            "topologies": [{"networks":["n1"],"map":[
                {"routing":"r1","groups":[{"name":"h1","ip":"10.0.0.1"}]}
            ]}]
        }"#,
    )
    .unwrap();
    Allocator::from_topology(&doc, NullSaver).unwrap()
}

#[derive(Debug, Clone, Copy)]
enum BlackoutOp {
    Alloc(u8),
    Dealloc(u8),
    Blackout(u8),
    Unblackout(u8),
}

/// Blackouts are always over one of the four aligned /30s in `10.0.0.0/28`, so a small alphabet
/// of indices is enough to generate overlapping broaden/narrow/remove sequences.
fn blackout_cidr(slot: u8) -> ipam_core::Cidr {
    format!("10.0.0.{}/30", (slot % 4) * 4).parse().unwrap()
}

fn blackout_op_strategy() -> impl Strategy<Value = BlackoutOp> {
    prop_oneof![
        (0u8..8).prop_map(BlackoutOp::Alloc),
        (0u8..8).prop_map(BlackoutOp::Dealloc),
        (0u8..4).prop_map(BlackoutOp::Blackout),
        (0u8..4).prop_map(BlackoutOp::Unblackout),
    ]
}

fn blackout_capable_network() -> Allocator<NullSaver> {
    let doc = parse_document(
        r#"{
            "networks": [{"name":"n1","cidr":"10.0.0.0/28","block_mask":30}],
            "topologies": [{"networks":["n1"],"map":[
                {"routing":"r1","groups":[{"name":"h1","ip":"10.0.0.1"}]}
            ]}]
        }"#,
    )
    .unwrap();
    Allocator::from_topology(&doc, NullSaver).unwrap()
}

fn live_owner_count(alloc: &Allocator<NullSaver>) -> usize {
    alloc
        .list_networks()
        .into_iter()
        .map(|n| alloc.list_blocks(&n.name).unwrap())
        .flatten()
        .map(|b| b.allocated)
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A token can never be double-allocated, and the sum of allocated bits across every block
    /// always matches how many tokens the model considers live.
    #[test]
    fn owner_set_matches_bitmap_popcount(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let alloc = single_host_network();
        let mut live: HashSet<u8> = HashSet::new();

        for op in ops {
            match op {
                Op::Alloc(token) => {
                    let owner = token.to_string();
                    let result = alloc.allocate(&owner, "h1", "tenant", "segment");
                    if live.contains(&token) {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        live.insert(token);
                    }
                }
                Op::Dealloc(token) => {
                    let owner = token.to_string();
                    let result = alloc.deallocate(&owner);
                    if live.contains(&token) {
                        prop_assert!(result.is_ok());
                        live.remove(&token);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
            }
            prop_assert_eq!(live_owner_count(&alloc), live.len());
        }
    }

    /// Every address returned by allocate() falls inside the network's declared CIDR.
    #[test]
    fn allocated_addresses_stay_in_network(tokens in prop::collection::vec(0u8..8, 0..8)) {
        let alloc = single_host_network();
        let network_cidr: ipam_core::Cidr = "10.0.0.0/24".parse().unwrap();
        let mut seen: HashSet<u8> = HashSet::new();

        for token in tokens {
            if seen.insert(token) {
                let owner = token.to_string();
                if let Ok(addr) = alloc.allocate(&owner, "h1", "tenant", "segment") {
                    prop_assert!(network_cidr.contains_address(addr));
                }
            }
        }
    }

    /// After any mix of allocate/deallocate/blackout/unblackout, every bit of every block that
    /// falls inside a currently-registered blackout is set, regardless of whether that bit was
    /// ever actually allocated.
    #[test]
    fn blackout_mask_always_covers_its_range(ops in prop::collection::vec(blackout_op_strategy(), 0..40)) {
        let alloc = blackout_capable_network();

        for op in ops {
            match op {
                BlackoutOp::Alloc(token) => {
                    let _ = alloc.allocate(&token.to_string(), "h1", "tenant", "segment");
                }
                BlackoutOp::Dealloc(token) => {
                    let _ = alloc.deallocate(&token.to_string());
                }
                BlackoutOp::Blackout(slot) => {
                    let _ = alloc.blackout(blackout_cidr(slot));
                }
                BlackoutOp::Unblackout(slot) => {
                    let _ = alloc.unblackout(blackout_cidr(slot));
                }
            }
        }

        let snapshot = alloc.snapshot();
        for network in &snapshot.networks {
            for blackout in &network.blackouts {
                for block in &network.blocks {
                    if !block.cidr.overlaps(blackout) {
                        continue;
                    }
                    for offset in 0..block.cidr.size() {
                        let addr = block.cidr.address_at(offset).unwrap();
                        if blackout.contains_address(addr) {
                            prop_assert!(
                                block.bitmap.bit(offset as usize),
                                "address {addr} is inside blackout {blackout} but its bit in block {} is clear",
                                block.cidr
                            );
                        }
                    }
                }
            }
        }
    }

    /// Every live allocation lands in a network whose tenant allow-list permits the tenant it
    /// was allocated under (wildcard networks permit every tenant).
    #[test]
    fn allocations_respect_tenant_scope(
        ops in prop::collection::vec((0u8..8, 0u8..3), 0..30)
    ) {
        let doc = parse_document(
            r#"{
                "networks": [
                    {"name":"nt1","cidr":"10.10.0.0/24","block_mask":30,"tenants":["t1"]},
                    {"name":"nt2","cidr":"10.20.0.0/24","block_mask":30,"tenants":["t2"]},
                    {"name":"wild","cidr":"10.30.0.0/24","block_mask":30}
                ],
                "topologies": [
                    {"networks":["nt1"],"map":[{"routing":"r","groups":[{"name":"hA","ip":"10.254.0.1"}]}]},
                    {"networks":["nt2"],"map":[{"routing":"r","groups":[{"name":"hB","ip":"10.254.0.2"}]}]},
                    {"networks":["wild"],"map":[{"routing":"r","groups":[{"name":"hC","ip":"10.254.0.3"}]}]}
                ]
            }"#,
        )
        .unwrap();
        let alloc = Allocator::from_topology(&doc, NullSaver).unwrap();
        let hosts = ["hA", "hB", "hC"];
        let tenants = ["t1", "t2", "unrouted-tenant"];
        let mut tenant_of: std::collections::HashMap<String, &str> = std::collections::HashMap::new();

        for (token, tenant_idx) in ops {
            let tenant = tenants[tenant_idx as usize];
            // Each call targets every host in turn so the eligible-network set gets exercised
            // across all three networks, not just whichever one the token's host happens to be in.
            for host in hosts {
                let owner = format!("{token}-{host}");
                if alloc.allocate(&owner, host, tenant, "seg").is_ok() {
                    tenant_of.insert(owner, tenant);
                }
            }
        }

        let snapshot = alloc.snapshot();
        for (owner_token, tenant) in &tenant_of {
            let record = snapshot
                .owners
                .get(owner_token)
                .expect("never deallocated, so still present in the snapshot");
            let network = snapshot
                .networks
                .iter()
                .find(|n| n.name == record.network)
                .expect("owner record references a network that exists");
            prop_assert!(
                network.allowed_tenants.is_empty() || network.allowed_tenants.contains(*tenant),
                "owner {owner_token} allocated under tenant {tenant} in network {}, whose \
                 allow-list is {:?}",
                network.name,
                network.allowed_tenants
            );
        }
    }

    /// Whatever random churn of other owners came before, deallocating one owner and
    /// immediately reallocating the same (host, tenant, segment) under the same token, with no
    /// intervening mutation, returns an address in the same block.
    #[test]
    fn realloc_after_dealloc_reuses_the_same_block(prefix in prop::collection::vec(op_strategy(), 0..30)) {
        let alloc = single_host_network();
        for op in prefix {
            match op {
                Op::Alloc(token) => {
                    let _ = alloc.allocate(&token.to_string(), "h1", "tenant", "segment");
                }
                Op::Dealloc(token) => {
                    let _ = alloc.deallocate(&token.to_string());
                }
            }
        }

        // A token well outside op_strategy's 0..8 range, so the churn above never touches it.
        let subject = "subject-owner";
        let first = alloc.allocate(subject, "h1", "tenant", "segment").unwrap();
        let first_block = alloc.lookup_owner(subject).expect("just allocated").block;
        alloc.deallocate(subject).unwrap();

        let second = alloc.allocate(subject, "h1", "tenant", "segment").unwrap();
        let second_block = alloc.lookup_owner(subject).expect("just allocated").block;

        prop_assert_eq!(first, second);
        prop_assert_eq!(first_block, second_block);
    }
}
