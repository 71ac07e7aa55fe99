//! ipam-core - the allocation engine for an address-management service.
//!
//! This crate provides:
//! - CIDR arithmetic and bitmap-backed address blocks
//! - The Network / Group / Host data model and its topology-document interpreter
//! - The `Allocator`, the single entry point for allocate/deallocate/blackout/topology
//!   operations, behind one `parking_lot::RwLock`
//! - Error types with miette diagnostics
//! - The `Saver` contract used to persist state after every mutation

pub mod address;
pub mod allocator;
pub mod bitmap;
pub mod block;
pub mod cidr;
pub mod config;
pub mod error;
pub mod group;
pub mod ids;
pub mod network;
pub mod owner;
pub mod saver;
pub mod topology;

pub use address::Address;
pub use allocator::{Allocator, BlockSummary, NetworkSummary};
pub use block::Block;
pub use cidr::Cidr;
pub use config::AllocatorConfig;
pub use error::{IpamError, Result};
pub use group::{Group, GroupKind, Host};
pub use ids::{BlockId, GroupId, HostId};
pub use network::Network;
pub use owner::OwnerRecord;
pub use saver::{NullSaver, Saver, Snapshot};
pub use topology::{parse_document, ParsedDocument, ParsedGroupNode, ParsedHost, ParsedNetwork, ParsedTopologyEntry};

/// Serialize a value to JSON.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| IpamError::invalid_topology(format!("failed to serialize to JSON: {e}")))
}

/// Serialize a value to pretty-printed JSON.
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| IpamError::invalid_topology(format!("failed to serialize to JSON: {e}")))
}

/// Deserialize a value from JSON.
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| IpamError::invalid_topology(format!("failed to deserialize from JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_on_a_snapshot() {
        let snap = Snapshot {
            networks: Vec::new(),
            owners: std::collections::HashMap::new(),
        };
        let json = to_json(&snap).unwrap();
        let back: Snapshot = from_json(&json).unwrap();
        assert_eq!(back.networks.len(), 0);
        assert_eq!(back.owners.len(), 0);
    }

    #[test]
    fn allocator_end_to_end_smoke() {
        let doc = parse_document(
            r#"{
                "networks": [{"name":"n1","cidr":"10.0.0.0/24","block_mask":30}],
                "topologies": [{"networks":["n1"],"map":[
                    {"routing":"r1","groups":[{"name":"h1","ip":"10.0.0.1"}]}
                ]}]
            }"#,
        )
        .unwrap();
        let alloc = Allocator::from_topology(&doc, NullSaver).unwrap();
        let addr = alloc.allocate("owner-1", "h1", "tenant-a", "seg-a").unwrap();
        assert_eq!(addr.to_string(), "10.0.0.0");
        alloc.deallocate("owner-1").unwrap();
        assert!(alloc.lookup_owner("owner-1").is_none());
    }
}
