use std::io::Write;
use std::path::{Path, PathBuf};

use ipam_core::saver::{Saver, Snapshot};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::SaverConfig;
use crate::error::Result;

/// A [`Saver`] that persists the whole snapshot as one pretty-printed JSON document.
///
/// Writes go through a temp file in the same directory as the target and are renamed into
/// place, so a reader never observes a partially-written document (§4.9).
pub struct FileSaver {
    path: PathBuf,
}

impl FileSaver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: SaverConfig) -> Self {
        Self { path: config.path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the most recently saved snapshot, or `None` if the file doesn't exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Snapshot>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_atomically(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Saver for FileSaver {
    fn save(&self, snapshot: &Snapshot) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let result = self.write_atomically(snapshot);
        if result.is_ok() {
            debug!(path = %self.path.display(), "saved snapshot");
        }
        result.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn saves_and_loads_an_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let saver = FileSaver::new(&path);

        let snapshot = Snapshot {
            networks: Vec::new(),
            owners: HashMap::new(),
        };
        saver.save(&snapshot).unwrap();

        let loaded = FileSaver::load(&path).unwrap().unwrap();
        assert_eq!(loaded.networks.len(), 0);
        assert_eq!(loaded.owners.len(), 0);
    }

    #[test]
    fn from_config_uses_the_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let saver = FileSaver::from_config(crate::config::SaverConfig::new(&path));
        assert_eq!(saver.path(), path);
    }

    #[test]
    fn loading_a_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert!(FileSaver::load(&path).unwrap().is_none());
    }

    #[test]
    fn overwrites_are_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let saver = FileSaver::new(&path);

        saver
            .save(&Snapshot {
                networks: Vec::new(),
                owners: HashMap::new(),
            })
            .unwrap();
        saver
            .save(&Snapshot {
                networks: Vec::new(),
                owners: HashMap::new(),
            })
            .unwrap();

        assert!(FileSaver::load(&path).unwrap().is_some());
    }
}
