//! Error Types for URL Canonicalization
//!
//! Canonicalizing a URL itself never fails (unparseable input is passed
//! through unchanged), so these errors only arise while loading fuzzy
//! canonicalization rule files.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid rules YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid fuzzy rule regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid fuzzy rules: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
