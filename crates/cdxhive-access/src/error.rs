//! Error Types for Access Control
//!
//! Errors split along the boundaries callers care about: referencing a policy
//! that does not exist is a validation problem the API reports back to the
//! client, while RocksDB and JSON failures are storage problems that abort the
//! operation in progress.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such policyId: {0}")]
    NoSuchPolicy(u64),

    #[error("rule has no policyId")]
    MissingPolicyId,

    #[error("invalid access rule: {0}")]
    InvalidRule(String),

    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("rule serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("capture error: {0}")]
    Capture(#[from] cdxhive_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
