use ipam_core::saver::{Saver, Snapshot};
use parking_lot::Mutex;

/// A [`Saver`] that records every snapshot it's given in memory, in order. Useful for tests
/// that want to assert on what was persisted without touching a filesystem.
#[derive(Default)]
pub struct MemorySaver {
    history: Mutex<Vec<Snapshot>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.history.lock().last().cloned()
    }
}

impl Saver for MemorySaver {
    fn save(&self, snapshot: &Snapshot) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.history.lock().push(snapshot.clone());
        Ok(())
    }
}
