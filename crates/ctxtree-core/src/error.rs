//! Error taxonomy for context tree operations.
//!
//! Lookup misses are not errors: `prune`, `replace`, `rename` and
//! `navigate` report them as `false` / `None`. The variants here cover the
//! cases a caller has to handle explicitly.

use std::path::PathBuf;

/// Context tree errors.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// `add_node` was given an explicit parent hash that is not in the tree.
    #[error("parent node not found: {hash}")]
    ParentNotFound { hash: String },

    /// A persisted record is structurally malformed.
    #[error("invalid tree record: {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An internal invariant broke. Unreachable in a correct build.
    #[error("structural violation: {0}")]
    StructuralViolation(String),
}

impl TreeError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Result type for context tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;
