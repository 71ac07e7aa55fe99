use std::path::PathBuf;

/// Destination for a [`crate::file_saver::FileSaver`], as a plain struct rather than a CLI/env
/// loader. Constructed programmatically or from the already-specified topology JSON.
#[derive(Debug, Clone)]
pub struct SaverConfig {
    pub path: PathBuf,
}

impl SaverConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}
