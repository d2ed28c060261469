//! Error Types for CdxHive Core
//!
//! This module defines all error types that can occur while encoding, decoding
//! and parsing capture records.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `Truncated`: Record key or value ended before all fields were read
//! - `BadKey`: Record key is structurally invalid (no room for the timestamp)
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: Record was written by a newer index version we don't support
//!
//! ### Parse Errors
//! - `InvalidCdxLine`: A CDX or CDXJ input line is malformed
//! - `InvalidTimestamp`: A CDX timestamp is too long or not numeric
//! - `NoSuchField`: A field name is not part of the CDX field set
//!
//! ## Usage
//! All functions in this crate return `Result<T>` which is aliased to
//! `Result<T, Error>`, so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record truncated")]
    Truncated,

    #[error("bad record key")]
    BadKey,

    #[error("CDX encoding is too new (v{0}) only versions up to v4 are supported")]
    UnsupportedVersion(u32),

    #[error("unsupported index version: {0}")]
    UnsupportedIndexVersion(u32),

    #[error("can't encode capture with extra CDXJ fields in index version {0}")]
    ExtraFields(u32),

    #[error("invalid CDX line: {0}")]
    InvalidCdxLine(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("no such capture field: {0}")]
    NoSuchField(String),

    #[error("expected a number in field {0}")]
    ExpectedNumber(String),
}

pub type Result<T> = std::result::Result<T, Error>;
