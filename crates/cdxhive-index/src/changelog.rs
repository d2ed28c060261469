//! Replication changelog.
//!
//! Every committed batch is recorded in the `changelog` column family as a
//! [`ChangeRecord`]: the list of raw put and delete operations that made up
//! the batch, keyed by a dense sequence number starting at 1. The record is
//! written inside the same atomic batch as the data it describes, so the
//! changelog can never disagree with the index.
//!
//! Downstream replicas poll the feed with
//! [`Index::changes_since`](crate::Index::changes_since), apply each entry
//! with [`Index::apply_changes`](crate::Index::apply_changes) and persist
//! their cursor under a reserved key in the same column family. Applied
//! entries are re-recorded under their upstream sequence numbers, so a
//! replica can itself feed further replicas.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Column family holding changelog entries and the replication cursor.
pub const CHANGELOG_CF: &str = "changelog";

/// Key the replication cursor is stored under. All-zero bytes sort before
/// every real entry, whose sequence numbers start at 1.
pub(crate) const CURSOR_KEY: [u8; 8] = [0; 8];

/// Column family a changelog operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfId {
    Default,
    Alias,
}

/// One raw operation from a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    Put { cf: CfId, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: CfId, key: Vec<u8> },
}

/// The payload stored for one committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Commit time in milliseconds since the epoch, used for age-out.
    pub created_at: i64,
    pub ops: Vec<ChangeOp>,
}

impl ChangeRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<ChangeRecord> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// One replication feed entry: a sequence number and the encoded
/// [`ChangeRecord`] it refers to. Serializes to the JSON wire format used by
/// the `/changes` endpoint, with the payload as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    #[serde(rename = "writeBatch", with = "base64_blob")]
    pub write_batch: Vec<u8>,
}

mod base64_blob {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        BASE64.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Sequence counter for a single index. Commits take the lock, write at
/// `latest() + 1` and advance the counter only after the write succeeds, so
/// sequence numbers are dense and never burned by a failed write.
pub(crate) struct Changelog {
    last: AtomicU64,
    commit_lock: Mutex<()>,
}

impl Changelog {
    pub(crate) fn new(last: u64) -> Changelog {
        Changelog {
            last: AtomicU64::new(last),
            commit_lock: Mutex::new(()),
        }
    }

    pub(crate) fn latest(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().unwrap()
    }

    pub(crate) fn advance_to(&self, seq: u64) {
        self.last.fetch_max(seq, Ordering::AcqRel);
    }
}

pub(crate) fn encode_seq(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

pub(crate) fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::BadChangelogEntry(format!("key is {} bytes, expected 8", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
