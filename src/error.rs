//! Typed failures that callers branch on.
//!
//! Most operations return `anyhow::Result`; the variants here are the ones
//! the CLI maps to distinct exit codes or that trigger recovery paths.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Another process holds the write lock on the index.
    #[error("index at {path} is locked by another writer")]
    Locked { path: PathBuf },

    /// The index changed between reading a snapshot and committing a result
    /// derived from it.
    #[error("index changed during the run (generation {expected} -> {found}); rerun the command")]
    Conflict { expected: u64, found: u64 },

    /// The index file failed its integrity check or has an unknown schema.
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("cannot read store root {path}: {reason}")]
    UnreadableRoot { path: PathBuf, reason: String },

    #[error("invalid backlink `{0}`: expected [[type:path#heading]] with type knowledge, work or thread")]
    InvalidBacklink(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IndexError {
    /// True for contention failures that a caller may retry.
    pub fn is_contention(&self) -> bool {
        matches!(self, IndexError::Locked { .. } | IndexError::Conflict { .. })
    }
}
