//! ipam-storage - Saver implementations for the IPAM allocator.
//!
//! This crate provides:
//! - `FileSaver`, a file-backed `Saver` that persists the whole snapshot as one JSON document
//!   via an atomic write-then-rename
//! - `MemorySaver`, an in-memory recorder for tests

pub mod config;
pub mod error;
pub mod file_saver;
pub mod memory_saver;

pub use config::SaverConfig;
pub use error::{Result, StorageError};
pub use file_saver::FileSaver;
pub use memory_saver::MemorySaver;
