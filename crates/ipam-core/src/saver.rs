use std::collections::HashMap;
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

use crate::network::Network;
use crate::owner::OwnerRecord;

/// The entire Allocator state, as handed to a [`Saver`] after every successful mutation.
///
/// This is also the shape of the persisted document described in §6: parsing a `Snapshot` back
/// and asking it every read-only query the live Allocator answers must agree, and
/// parse(serialize(snapshot)) must reproduce the same bytes on a quiescent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub networks: Vec<Network>,
    pub owners: HashMap<String, OwnerRecord>,
}

/// A caller-supplied sink invoked after every successful mutation (§4.9).
///
/// Implementations must be synchronous and total: either the whole snapshot is durably
/// recorded, or `save` returns `Err` and the Allocator rolls the mutation back. `save` is never
/// called for intermediate steps within one operation — exactly once per externally-visible
/// mutation.
pub trait Saver: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// A `Saver` that accepts every snapshot and discards it. Useful for tests and for callers who
/// only care about the in-memory allocator state.
#[derive(Debug, Default)]
pub struct NullSaver;

impl Saver for NullSaver {
    fn save(&self, _snapshot: &Snapshot) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }
}
