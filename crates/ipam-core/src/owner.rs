use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ids::{BlockId, HostId};

/// A live allocation: the address handed out, and enough back-references to release it again
/// without re-walking the Group tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub owner_token: String,
    pub network: String,
    pub address: Address,
    pub block: BlockId,
    pub offset: usize,
    pub host: HostId,
}
