//! Error types for the capture index.

use thiserror::Error;

/// Errors returned by the index, query engine and replication changelog.
#[derive(Debug, Error)]
pub enum Error {
    /// A query parameter failed to parse or validate.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Collection names are restricted to `[A-Za-z0-9_-]+`.
    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    /// The database was opened without one of the required column families.
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),

    /// A changelog key or payload could not be decoded.
    #[error("bad changelog entry: {0}")]
    BadChangelogEntry(String),

    /// The requested part of the replication feed has been truncated away.
    #[error("replication history no longer contains sequence {0}")]
    HistoryTruncated(u64),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("capture error: {0}")]
    Capture(#[from] cdxhive_core::Error),

    #[error("access control error: {0}")]
    Access(#[from] cdxhive_access::Error),

    #[error("changelog serialization error: {0}")]
    Changelog(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
