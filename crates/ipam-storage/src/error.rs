// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Storage error type: everything that can go wrong turning a `Snapshot` into durable bytes.
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// The snapshot could not be serialized to JSON.
    #[error("serialization error: {message}")]
    #[diagnostic(code(storage::serialization_error), help("ensure the snapshot's data is valid UTF-8 JSON"))]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Writing the snapshot to disk failed (temp file write, rename, or directory access).
    #[error("I/O error: {message}")]
    #[diagnostic(code(storage::io_error), help("check filesystem permissions and available disk space"))]
    IoError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    pub fn io_error(message: impl Into<String>, source: Option<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::IoError {
            message: message.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization_error(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io_error(format!("I/O error: {err}"), Some(Box::new(err)))
    }
}
