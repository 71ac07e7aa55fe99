use miette::Diagnostic;
use thiserror::Error;

/// Core error type for IPAM operations.
#[derive(Error, Debug, Diagnostic)]
pub enum IpamError {
    /// A CIDR string failed to parse or violated an invariant (non-zero host bits, length out
    /// of range).
    #[error("bad CIDR {cidr:?}: {reason}")]
    #[diagnostic(
        code(ipam::bad_cidr),
        help("expected the form A.B.C.D/L with L in 0..=32 and no set host bits")
    )]
    BadCidr {
        cidr: String,
        reason: String,
    },

    /// A network's `block_mask` was outside `cidr.length..=32`.
    #[error("bad block mask {block_mask} for network {network} (cidr length {cidr_length})")]
    #[diagnostic(
        code(ipam::bad_block_mask),
        help("block_mask must satisfy network.cidr.length <= block_mask <= 32")
    )]
    BadBlockMask {
        network: String,
        block_mask: u8,
        cidr_length: u8,
    },

    /// A name that must be unique (network, host) was declared twice.
    #[error("duplicate {kind} name: {name}")]
    #[diagnostic(code(ipam::duplicate_name), help("names must be unique within this allocator"))]
    DuplicateName {
        kind: &'static str,
        name: String,
    },

    /// `allocate` referenced a host that isn't in any topology.
    #[error("unknown host: {host}")]
    #[diagnostic(code(ipam::unknown_host), help("add the host via add_host before allocating for it"))]
    UnknownHost {
        host: String,
    },

    /// `deallocate` referenced an owner token with no recorded allocation.
    #[error("unknown owner: {owner}")]
    #[diagnostic(code(ipam::unknown_owner), help("the owner token has no live allocation"))]
    UnknownOwner {
        owner: String,
    },

    /// `allocate` reused an owner token that already has a live allocation.
    #[error("duplicate owner: {owner}")]
    #[diagnostic(
        code(ipam::duplicate_owner),
        help("callers resubmitting an allocate call should check for an existing record first")
    )]
    DuplicateOwner {
        owner: String,
    },

    /// `add_host` referenced a name already in use.
    #[error("duplicate host: {host}")]
    #[diagnostic(code(ipam::duplicate_host), help("host names are unique across the allocator"))]
    DuplicateHost {
        host: String,
    },

    /// No network/group/block combination could satisfy the allocation request.
    #[error("no available IP: {reason}")]
    #[diagnostic(
        code(ipam::no_available_ip),
        help("free an address, widen the network, or remove a blackout")
    )]
    NoAvailableIp {
        reason: String,
    },

    /// `remove_host` was called on a host with live allocations.
    #[error("host in use: {host} has {allocation_count} live allocation(s)")]
    #[diagnostic(
        code(ipam::host_in_use),
        help("deallocate every owner attributed to this host before removing it")
    )]
    HostInUse {
        host: String,
        allocation_count: usize,
    },

    /// A blackout request tried to cover an entire network.
    #[error("cannot blackout the entire network {network}")]
    #[diagnostic(
        code(ipam::cannot_blackout_entire_network),
        help("blackouts must leave at least one address allocatable")
    )]
    CannotBlackoutEntireNetwork {
        network: String,
    },

    /// A blackout request overlapped a currently-live allocation.
    #[error("blackout {cidr} collides with a live allocation in network {network}")]
    #[diagnostic(
        code(ipam::blackout_collides_with_allocation),
        help("deallocate the conflicting owner(s) before blacking out this range")
    )]
    BlackoutCollidesWithAllocation {
        network: String,
        cidr: String,
    },

    /// `unblackout` referenced a CIDR that isn't in the registry.
    #[error("no such blackout: {cidr} in network {network}")]
    #[diagnostic(code(ipam::no_such_blackout), help("unblackout requires an exact CIDR match"))]
    NoSuchBlackout {
        network: String,
        cidr: String,
    },

    /// A blackout/unblackout CIDR isn't contained in any configured network.
    #[error("no network contains {cidr}")]
    #[diagnostic(code(ipam::no_containing_network), help("check the CIDR against the configured networks"))]
    NoContainingNetwork {
        cidr: String,
    },

    /// A topology update would reshape or resize a network/group that has live allocations.
    #[error("topology conflict: {reason}")]
    #[diagnostic(
        code(ipam::topology_conflict),
        help("deallocate the affected addresses or keep the conflicting network/group unchanged")
    )]
    TopologyConflict {
        reason: String,
    },

    /// The topology document itself was malformed (not a structural conflict with live state).
    #[error("invalid topology document: {reason}")]
    #[diagnostic(code(ipam::invalid_topology), help("check the topology document against the documented schema"))]
    InvalidTopology {
        reason: String,
    },

    /// The Saver hook rejected a mutation; the mutation has been rolled back.
    #[error("save failed, mutation rolled back: {message}")]
    #[diagnostic(
        code(ipam::save_failed),
        help("the in-memory state was restored to what it was before this call")
    )]
    SaveFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for IPAM operations.
pub type Result<T> = std::result::Result<T, IpamError>;

impl IpamError {
    pub fn bad_cidr(cidr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadCidr {
            cidr: cidr.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_block_mask(network: impl Into<String>, block_mask: u8, cidr_length: u8) -> Self {
        Self::BadBlockMask {
            network: network.into(),
            block_mask,
            cidr_length,
        }
    }

    pub fn duplicate_name(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    pub fn unknown_host(host: impl Into<String>) -> Self {
        Self::UnknownHost { host: host.into() }
    }

    pub fn unknown_owner(owner: impl Into<String>) -> Self {
        Self::UnknownOwner { owner: owner.into() }
    }

    pub fn duplicate_owner(owner: impl Into<String>) -> Self {
        Self::DuplicateOwner { owner: owner.into() }
    }

    pub fn duplicate_host(host: impl Into<String>) -> Self {
        Self::DuplicateHost { host: host.into() }
    }

    pub fn no_available_ip(reason: impl Into<String>) -> Self {
        Self::NoAvailableIp { reason: reason.into() }
    }

    pub fn host_in_use(host: impl Into<String>, allocation_count: usize) -> Self {
        Self::HostInUse {
            host: host.into(),
            allocation_count,
        }
    }

    pub fn cannot_blackout_entire_network(network: impl Into<String>) -> Self {
        Self::CannotBlackoutEntireNetwork {
            network: network.into(),
        }
    }

    pub fn blackout_collides_with_allocation(
        network: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self::BlackoutCollidesWithAllocation {
            network: network.into(),
            cidr: cidr.into(),
        }
    }

    pub fn no_such_blackout(network: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self::NoSuchBlackout {
            network: network.into(),
            cidr: cidr.into(),
        }
    }

    pub fn no_containing_network(cidr: impl Into<String>) -> Self {
        Self::NoContainingNetwork { cidr: cidr.into() }
    }

    pub fn topology_conflict(reason: impl Into<String>) -> Self {
        Self::TopologyConflict { reason: reason.into() }
    }

    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology { reason: reason.into() }
    }

    pub fn save_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SaveFailed {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = IpamError::unknown_host("db-1");
        assert!(matches!(err, IpamError::UnknownHost { .. }));

        let err = IpamError::bad_block_mask("prod", 20, 24);
        assert!(matches!(err, IpamError::BadBlockMask { .. }));
    }
}
