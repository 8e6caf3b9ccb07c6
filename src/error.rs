//! Error types surfaced by index construction, persistence, and load.

use thiserror::Error;

/// Errors produced by the indexer, the storage writers, and the searcher.
///
/// Programmer errors (out-of-range item ids, wrong-length query slices)
/// panic through bounds checks instead of flowing through this type.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Rejected at construction: dimension or leaf block length violates
    /// the layout constraints.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An open/write/map syscall failed. Never retried by the core.
    #[error("i/o failure")]
    Io(#[from] std::io::Error),

    /// The artifact does not decode as an index: bad header, size not
    /// divisible by the record size, or no roots behind a non-empty node
    /// array. No partial state is observable after this error.
    #[error("malformed index artifact: {0}")]
    MalformedArtifact(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
