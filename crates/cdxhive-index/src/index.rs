//! RocksDB-backed capture index.
//!
//! Captures live in the default column family under keys that sort by
//! `(urlkey, timestamp)`, so every query style is a seek followed by a
//! bounded scan:
//!
//! - **exact**: scan while the urlkey matches, optionally time-bounded
//! - **prefix**: scan while the urlkey starts with the queried prefix
//! - **range**: scan while the urlkey is below an end key
//! - **closest**: merge a forward and a backward scan around a target
//!   timestamp, nearest capture first
//!
//! Aliases map one urlkey to another and are applied at write time:
//! [`Batch::put_capture`] stores under the resolved target, and
//! [`Batch::put_alias`] rewrites captures already stored under the alias.
//! Reads consult the alias table once, to resolve the queried key.
//!
//! All writes go through a [`Batch`] and commit atomically together with a
//! changelog record for replication, so replicas can replay exactly what
//! the primary wrote.

use chrono::Utc;
use rocksdb::{ColumnFamily, DBRawIterator, WriteBatch, WriteOptions, DB};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

use cdxhive_access::{AccessControl, CaptureAccessFilter};
use cdxhive_core::capture::encode_key_v0;
use cdxhive_core::{timestamp_to_millis, Capture};

use crate::changelog::{
    decode_seq, encode_seq, CfId, ChangeEvent, ChangeOp, ChangeRecord, Changelog, CHANGELOG_CF,
    CURSOR_KEY,
};
use crate::error::{Error, Result};
use crate::store::StoreConfig;

/// Column family mapping alias urlkeys to their targets.
pub const ALIAS_CF: &str = "alias";

const DEFAULT_CF: &str = "default";

/// Largest 14 digit timestamp, used as the open upper bound for scans.
pub const TIMESTAMP_MAX: u64 = 99_999_999_999_999;

/// Host portion of a SURT: everything before the first `)`.
pub fn host_from_surt(surt: &str) -> &str {
    match surt.find(')') {
        Some(position) => &surt[..position],
        None => surt,
    }
}

/// One collection's capture index.
pub struct Index {
    name: String,
    db: Arc<DB>,
    access: Arc<AccessControl>,
    version: AtomicU32,
    changelog: Changelog,
    replication_window_millis: Option<i64>,
}

/// Bound on a capture scan, tested against each decoded record. Scans stop
/// at the first record outside the scope since keys are visited in order.
#[derive(Debug, Clone)]
enum Scope {
    Exact { urlkey: String, from: u64, to: u64 },
    Prefix(String),
    Before(String),
    All,
}

impl Scope {
    fn admits(&self, capture: &Capture) -> bool {
        match self {
            Scope::Exact { urlkey, from, to } => {
                capture.urlkey == *urlkey && capture.timestamp >= *from && capture.timestamp <= *to
            }
            Scope::Prefix(prefix) => capture.urlkey.starts_with(prefix.as_str()),
            Scope::Before(end) => capture.urlkey.as_str() < end.as_str(),
            Scope::All => true,
        }
    }
}

impl Index {
    pub(crate) fn new(name: &str, db: Arc<DB>, config: &StoreConfig) -> Result<Index> {
        let access = Arc::new(AccessControl::open(db.clone())?);
        let last_seq = {
            let cf = db
                .cf_handle(CHANGELOG_CF)
                .ok_or(Error::MissingColumnFamily(CHANGELOG_CF))?;
            let mut iter = db.raw_iterator_cf(cf);
            iter.seek_to_last();
            let last_entry = if iter.valid() {
                iter.key().map(decode_seq).transpose()?.unwrap_or(0)
            } else {
                0
            };
            let cursor = db
                .get_cf(cf, CURSOR_KEY)?
                .and_then(|bytes| String::from_utf8_lossy(&bytes).trim().parse().ok())
                .unwrap_or(0);
            last_entry.max(cursor)
        };
        Ok(Index {
            name: name.to_string(),
            db,
            access,
            version: AtomicU32::new(config.index_version),
            changelog: Changelog::new(last_seq),
            replication_window_millis: config
                .replication_window_secs
                .filter(|secs| *secs > 0)
                .map(|secs| secs as i64 * 1000),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    /// Starts a new write batch against this index.
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            index: self,
            batch: WriteBatch::default(),
            ops: Vec::new(),
            new_aliases: HashMap::new(),
            version: self.version(),
        }
    }

    /// Resolves an alias to its target urlkey, or returns the key unchanged
    /// when no alias exists.
    pub fn resolve_alias(&self, urlkey: &str) -> Result<String> {
        match self.db.get_cf(self.cf(ALIAS_CF)?, urlkey.as_bytes())? {
            Some(target) => Ok(String::from_utf8_lossy(&target).into_owned()),
            None => Ok(urlkey.to_string()),
        }
    }

    /// Captures for one urlkey in ascending timestamp order.
    pub fn query(
        &self,
        urlkey: &str,
        from: u64,
        to: u64,
        access_point: Option<&str>,
    ) -> Result<Captures<'_>> {
        let urlkey = self.resolve_alias(urlkey)?;
        let start = encode_key_v0(&urlkey, from);
        self.scan(start, Scope::Exact { urlkey, from, to }, access_point, false)
    }

    /// Captures for one urlkey in descending timestamp order. A capture
    /// falling exactly on `to` is excluded: the scan starts just before it.
    pub fn reverse_query(
        &self,
        urlkey: &str,
        from: u64,
        to: u64,
        access_point: Option<&str>,
    ) -> Result<Captures<'_>> {
        let urlkey = self.resolve_alias(urlkey)?;
        let start = encode_key_v0(&urlkey, to);
        self.scan(start, Scope::Exact { urlkey, from, to }, access_point, true)
    }

    /// Captures for every urlkey starting with `prefix`.
    pub fn prefix_query(&self, prefix: &str, access_point: Option<&str>) -> Result<Captures<'_>> {
        let start = encode_key_v0(prefix, 0);
        self.scan(start, Scope::Prefix(prefix.to_string()), access_point, false)
    }

    /// Captures for every urlkey in `start..end`, or unbounded when `end`
    /// is `None`.
    pub fn range_query(
        &self,
        start: &str,
        end: Option<&str>,
        access_point: Option<&str>,
    ) -> Result<Captures<'_>> {
        let scope = match end {
            Some(end) => Scope::Before(end.to_string()),
            None => Scope::All,
        };
        self.scan(encode_key_v0(start, 0), scope, access_point, false)
    }

    /// Captures for a whole reversed domain, subdomains included.
    pub fn domain_query(&self, host: &str, access_point: Option<&str>) -> Result<Captures<'_>> {
        // ')' and ',' both sort below '-', so this covers the apex and
        // every subdomain but nothing beyond them.
        self.range_query(host, Some(&format!("{host}-")), access_point)
    }

    /// Captures for one urlkey ordered by distance from a target timestamp.
    pub fn closest_query(
        &self,
        urlkey: &str,
        target: u64,
        access_point: Option<&str>,
    ) -> Result<ClosestCaptures<'_>> {
        let urlkey = self.resolve_alias(urlkey)?;
        let start = encode_key_v0(&urlkey, target);
        let scope = Scope::Exact {
            urlkey,
            from: 0,
            to: TIMESTAMP_MAX,
        };
        let forward = self.scan(start.clone(), scope.clone(), access_point, false)?;
        let backward = self.scan(start, scope, access_point, true)?;
        ClosestCaptures::new(target, forward, backward)
    }

    /// Captures stored directly under a urlkey, without alias resolution or
    /// access filtering.
    pub fn raw_query(&self, urlkey: &str) -> Result<Captures<'_>> {
        let start = encode_key_v0(urlkey, 0);
        let scope = Scope::Exact {
            urlkey: urlkey.to_string(),
            from: 0,
            to: TIMESTAMP_MAX,
        };
        self.scan(start, scope, None, false)
    }

    /// Every capture with a urlkey at or after `start`, in key order.
    pub fn captures_after(&self, start: &str) -> Result<Captures<'_>> {
        self.scan(encode_key_v0(start, 0), Scope::All, None, false)
    }

    fn scan(
        &self,
        start: Vec<u8>,
        scope: Scope,
        access_point: Option<&str>,
        reverse: bool,
    ) -> Result<Captures<'_>> {
        let mut iter = self.db.raw_iterator();
        iter.seek(&start);
        if reverse {
            // Step back from the first key at or past the start. An exact
            // hit is skipped, which is what reverse time bounds expect.
            if iter.valid() {
                iter.prev();
            } else {
                iter.seek_to_last();
            }
        }
        let filter = access_point
            .map(|point| CaptureAccessFilter::new(self.access.clone(), point, Utc::now()));
        Ok(Captures {
            iter,
            scope,
            filter,
            reverse,
            done: false,
        })
    }

    /// Aliases with an alias urlkey at or after `start`, in key order.
    pub fn list_aliases(&self, start: &str) -> Result<Aliases<'_>> {
        let mut iter = self.db.raw_iterator_cf(self.cf(ALIAS_CF)?);
        iter.seek(start.as_bytes());
        Ok(Aliases { iter, done: false })
    }

    /// Approximate number of stored captures, from the storage engine's
    /// key estimate.
    pub fn estimated_record_count(&self) -> Result<u64> {
        Ok(self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }

    /// Raw storage engine property, for diagnostics.
    pub fn property(&self, name: &str) -> Result<Option<String>> {
        Ok(self.db.property_value(name)?)
    }

    /// Rewrites every capture record in the target key format. Only
    /// versions 3 and 4 can be upgrade targets.
    pub fn upgrade(&self, target: u32) -> Result<()> {
        if target != 3 && target != 4 {
            return Err(cdxhive_core::Error::UnsupportedIndexVersion(target).into());
        }
        let current = self.version();
        if current == target {
            return Ok(());
        }
        info!(index = %self.name, from = current, to = target, "rewriting capture records");
        let mut batch = WriteBatch::default();
        let mut ops = Vec::new();
        let mut rewritten = 0u64;
        for capture in self.captures_after("")? {
            let capture = capture?;
            let old_key = capture.encode_key(current)?;
            let new_key = capture.encode_key(target)?;
            let value = capture.encode_value(target)?;
            if old_key != new_key {
                batch.delete(&old_key);
                ops.push(ChangeOp::Delete {
                    cf: CfId::Default,
                    key: old_key,
                });
            }
            batch.put(&new_key, &value);
            ops.push(ChangeOp::Put {
                cf: CfId::Default,
                key: new_key,
                value,
            });
            rewritten += 1;
            if ops.len() >= 10_000 {
                self.commit_ops(std::mem::take(&mut batch), std::mem::take(&mut ops))?;
            }
        }
        if !ops.is_empty() {
            self.commit_ops(batch, ops)?;
        }
        self.version.store(target, Ordering::Release);
        info!(index = %self.name, records = rewritten, "capture record rewrite complete");
        Ok(())
    }

    /// Sequence number of the most recent changelog entry.
    pub fn latest_sequence(&self) -> u64 {
        self.changelog.latest()
    }

    /// Changelog entries with sequence numbers strictly greater than
    /// `since`. Stops once the cumulative payload reaches `size_cap` bytes,
    /// but always returns at least one entry when any are pending.
    pub fn changes_since(&self, since: u64, size_cap: usize) -> Result<Vec<ChangeEvent>> {
        let first = since.saturating_add(1);
        let cf = self.cf(CHANGELOG_CF)?;
        let mut iter = self.db.raw_iterator_cf(cf);
        iter.seek(encode_seq(first));
        let mut events: Vec<ChangeEvent> = Vec::new();
        let mut total = 0usize;
        while iter.valid() {
            let (key, value) = match (iter.key(), iter.value()) {
                (Some(key), Some(value)) => (key, value),
                _ => break,
            };
            let seq = decode_seq(key)?;
            total += value.len();
            events.push(ChangeEvent {
                sequence_number: seq,
                write_batch: value.to_vec(),
            });
            if total >= size_cap {
                break;
            }
            iter.next();
        }
        iter.status()?;
        match events.first() {
            Some(event) if event.sequence_number != first => Err(Error::HistoryTruncated(first)),
            None if self.changelog.latest() > since => Err(Error::HistoryTruncated(first)),
            _ => Ok(events),
        }
    }

    /// Applies replicated changelog entries in order. Each entry commits
    /// atomically together with the updated replication cursor, and is
    /// re-recorded under its upstream sequence number so this index can in
    /// turn feed further replicas. Returns the last applied sequence number.
    pub fn apply_changes(&self, events: &[ChangeEvent]) -> Result<Option<u64>> {
        let mut last = None;
        for event in events {
            self.apply_change(event)?;
            last = Some(event.sequence_number);
        }
        Ok(last)
    }

    fn apply_change(&self, event: &ChangeEvent) -> Result<()> {
        let record = ChangeRecord::decode(&event.write_batch)?;
        let mut batch = WriteBatch::default();
        for op in &record.ops {
            match op {
                ChangeOp::Put { cf, key, value } => batch.put_cf(self.op_cf(*cf)?, key, value),
                ChangeOp::Delete { cf, key } => batch.delete_cf(self.op_cf(*cf)?, key),
            }
        }
        let changelog_cf = self.cf(CHANGELOG_CF)?;
        batch.put_cf(changelog_cf, encode_seq(event.sequence_number), &event.write_batch);
        batch.put_cf(
            changelog_cf,
            CURSOR_KEY,
            event.sequence_number.to_string().as_bytes(),
        );
        let guard = self.changelog.lock();
        self.write_sync(batch)?;
        self.changelog.advance_to(event.sequence_number);
        drop(guard);
        Ok(())
    }

    /// The persisted sequence cursor: the highest sequence number committed
    /// to this index, whether by local writes or by replication. A
    /// downstream poller resumes from here after a restart.
    pub fn replication_cursor(&self) -> Result<u64> {
        match self.db.get_cf(self.cf(CHANGELOG_CF)?, CURSOR_KEY)? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|text| text.trim().parse().ok())
                .ok_or_else(|| Error::BadChangelogEntry("replication cursor is not a number".to_string())),
            None => Ok(0),
        }
    }

    /// Deletes changelog entries up to and including `up_to`, reclaiming
    /// space once replicas no longer need them. Returns how many were
    /// deleted.
    pub fn truncate_changelog(&self, up_to: u64) -> Result<u64> {
        let cf = self.cf(CHANGELOG_CF)?;
        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;
        let mut iter = self.db.raw_iterator_cf(cf);
        iter.seek(encode_seq(1));
        while iter.valid() {
            match iter.key() {
                Some(key) => {
                    if decode_seq(key)? > up_to {
                        break;
                    }
                    batch.delete_cf(cf, key);
                    deleted += 1;
                }
                None => break,
            }
            iter.next();
        }
        iter.status()?;
        if deleted > 0 {
            self.db.write(batch)?;
        }
        Ok(deleted)
    }

    fn expire_changelog(&self) -> Result<()> {
        let window = match self.replication_window_millis {
            Some(window) => window,
            None => return Ok(()),
        };
        let cutoff = Utc::now().timestamp_millis() - window;
        let cf = self.cf(CHANGELOG_CF)?;
        let mut batch = WriteBatch::default();
        let mut iter = self.db.raw_iterator_cf(cf);
        iter.seek(encode_seq(1));
        // Entries are in commit order, so stop at the first young one.
        while iter.valid() {
            match (iter.key(), iter.value()) {
                (Some(key), Some(value)) => {
                    if ChangeRecord::decode(value)?.created_at >= cutoff {
                        break;
                    }
                    batch.delete_cf(cf, key);
                }
                _ => break,
            }
            iter.next();
        }
        iter.status()?;
        if !batch.is_empty() {
            self.db.write(batch)?;
        }
        Ok(())
    }

    /// Commits a batch and its changelog record in one atomic, synced
    /// write. The commit lock serializes writers so sequence numbers come
    /// out dense and in order.
    fn commit_ops(&self, mut batch: WriteBatch, ops: Vec<ChangeOp>) -> Result<u64> {
        let record = ChangeRecord {
            created_at: Utc::now().timestamp_millis(),
            ops,
        };
        let payload = record.encode()?;
        let cf = self.cf(CHANGELOG_CF)?;
        let guard = self.changelog.lock();
        let seq = self.changelog.latest() + 1;
        batch.put_cf(cf, encode_seq(seq), &payload);
        // Persisting the cursor alongside keeps numbering monotonic even
        // after old entries are truncated away.
        batch.put_cf(cf, CURSOR_KEY, seq.to_string().as_bytes());
        self.write_sync(batch)?;
        self.changelog.advance_to(seq);
        drop(guard);
        if self.replication_window_millis.is_some() {
            self.expire_changelog()?;
        }
        Ok(seq)
    }

    fn write_sync(&self, batch: WriteBatch) -> Result<()> {
        let mut options = WriteOptions::default();
        options.set_sync(true);
        self.db.write_opt(batch, &options)?;
        Ok(())
    }

    /// Rewrites captures stored under `alias` so they live under `target`
    /// instead, appending the moves to an in-progress batch.
    fn rewrite_aliased_captures(
        &self,
        batch: &mut WriteBatch,
        ops: &mut Vec<ChangeOp>,
        alias: &str,
        target: &str,
        version: u32,
    ) -> Result<()> {
        for capture in self.raw_query(alias)? {
            let mut capture = capture?;
            let old_key = capture.encode_key(version)?;
            batch.delete(&old_key);
            ops.push(ChangeOp::Delete {
                cf: CfId::Default,
                key: old_key,
            });
            capture.urlkey = target.to_string();
            let key = capture.encode_key(version)?;
            let value = capture.encode_value(version)?;
            batch.put(&key, &value);
            ops.push(ChangeOp::Put {
                cf: CfId::Default,
                key,
                value,
            });
        }
        Ok(())
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or(Error::MissingColumnFamily(name))
    }

    fn op_cf(&self, id: CfId) -> Result<&ColumnFamily> {
        match id {
            CfId::Default => self.cf(DEFAULT_CF),
            CfId::Alias => self.cf(ALIAS_CF),
        }
    }
}

/// Pending writes against an [`Index`]. Nothing is visible until
/// [`Batch::commit`] succeeds, and the whole batch commits atomically.
pub struct Batch<'a> {
    index: &'a Index,
    batch: WriteBatch,
    ops: Vec<ChangeOp>,
    new_aliases: HashMap<String, String>,
    version: u32,
}

impl Batch<'_> {
    /// Stages a capture, storing it under its alias target when one exists
    /// (including aliases added earlier in this same batch).
    pub fn put_capture(&mut self, mut capture: Capture) -> Result<()> {
        capture.urlkey = match self.new_aliases.get(&capture.urlkey) {
            Some(target) => target.clone(),
            None => self.index.resolve_alias(&capture.urlkey)?,
        };
        let key = capture.encode_key(self.version)?;
        let value = capture.encode_value(self.version)?;
        self.batch.put(&key, &value);
        self.ops.push(ChangeOp::Put {
            cf: CfId::Default,
            key,
            value,
        });
        Ok(())
    }

    /// Stages deletion of a capture by its key fields.
    pub fn delete_capture(&mut self, capture: &Capture) -> Result<()> {
        let key = capture.encode_key(self.version)?;
        self.batch.delete(&key);
        self.ops.push(ChangeOp::Delete {
            cf: CfId::Default,
            key,
        });
        Ok(())
    }

    /// Stages an alias from one urlkey to another and moves any captures
    /// already stored under the alias. A self-referential alias is a no-op.
    pub fn put_alias(&mut self, alias: &str, target: &str) -> Result<()> {
        if alias == target {
            return Ok(());
        }
        self.batch
            .put_cf(self.index.cf(ALIAS_CF)?, alias.as_bytes(), target.as_bytes());
        self.ops.push(ChangeOp::Put {
            cf: CfId::Alias,
            key: alias.as_bytes().to_vec(),
            value: target.as_bytes().to_vec(),
        });
        self.new_aliases
            .insert(alias.to_string(), target.to_string());
        self.index
            .rewrite_aliased_captures(&mut self.batch, &mut self.ops, alias, target, self.version)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commits the batch and returns its changelog sequence number.
    ///
    /// When the batch introduced aliases, a second pass re-scans them after
    /// the commit and moves any captures that raced in under the alias
    /// between staging and commit. Applying an alias twice is harmless, so
    /// convergence is at-least-once.
    pub fn commit(self) -> Result<u64> {
        let Batch {
            index,
            batch,
            ops,
            new_aliases,
            version,
        } = self;
        let seq = index.commit_ops(batch, ops)?;
        if !new_aliases.is_empty() {
            let mut sweep = WriteBatch::default();
            let mut sweep_ops = Vec::new();
            for (alias, target) in &new_aliases {
                index.rewrite_aliased_captures(&mut sweep, &mut sweep_ops, alias, target, version)?;
            }
            if !sweep_ops.is_empty() {
                index.commit_ops(sweep, sweep_ops)?;
            }
        }
        Ok(seq)
    }
}

/// Iterator over captures in key order. Decode failures and storage errors
/// surface as `Err` items and end the iteration.
pub struct Captures<'i> {
    iter: DBRawIterator<'i>,
    scope: Scope,
    filter: Option<CaptureAccessFilter>,
    reverse: bool,
    done: bool,
}

impl Iterator for Captures<'_> {
    type Item = Result<Capture>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if !self.iter.valid() {
                self.done = true;
                return match self.iter.status() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err.into())),
                };
            }
            let capture = match (self.iter.key(), self.iter.value()) {
                (Some(key), Some(value)) => match Capture::decode(key, value) {
                    Ok(capture) => capture,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err.into()));
                    }
                },
                _ => {
                    self.done = true;
                    return None;
                }
            };
            if !self.scope.admits(&capture) {
                self.done = true;
                return None;
            }
            if self.reverse {
                self.iter.prev();
            } else {
                self.iter.next();
            }
            if let Some(filter) = &mut self.filter {
                match filter.test(&capture) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err.into()));
                    }
                }
            }
            return Some(Ok(capture));
        }
    }
}

/// An alias entry: queries for `alias` are answered from `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub alias: String,
    pub target: String,
}

/// Iterator over the alias table in key order.
pub struct Aliases<'i> {
    iter: DBRawIterator<'i>,
    done: bool,
}

impl Iterator for Aliases<'_> {
    type Item = Result<Alias>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.iter.valid() {
            self.done = true;
            return match self.iter.status() {
                Ok(()) => None,
                Err(err) => Some(Err(err.into())),
            };
        }
        let entry = match (self.iter.key(), self.iter.value()) {
            (Some(key), Some(value)) => Alias {
                alias: String::from_utf8_lossy(key).into_owned(),
                target: String::from_utf8_lossy(value).into_owned(),
            },
            _ => {
                self.done = true;
                return None;
            }
        };
        self.iter.next();
        Some(Ok(entry))
    }
}

/// Merges a forward and a backward scan into distance order around a
/// target timestamp. Ties go to the forward (later) capture.
pub struct ClosestCaptures<'i> {
    target_millis: i64,
    forward: Captures<'i>,
    backward: Captures<'i>,
    next_forward: Option<(Capture, i64)>,
    next_backward: Option<(Capture, i64)>,
}

impl<'i> ClosestCaptures<'i> {
    fn new(target: u64, forward: Captures<'i>, backward: Captures<'i>) -> Result<ClosestCaptures<'i>> {
        Ok(ClosestCaptures {
            target_millis: timestamp_to_millis(target)?,
            forward,
            backward,
            next_forward: None,
            next_backward: None,
        })
    }
}

fn fill_side(side: &mut Option<(Capture, i64)>, scan: &mut Captures<'_>) -> Result<()> {
    if side.is_none() {
        if let Some(item) = scan.next() {
            let capture = item?;
            let millis = timestamp_to_millis(capture.timestamp)?;
            *side = Some((capture, millis));
        }
    }
    Ok(())
}

impl Iterator for ClosestCaptures<'_> {
    type Item = Result<Capture>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = fill_side(&mut self.next_forward, &mut self.forward) {
            return Some(Err(err));
        }
        if let Err(err) = fill_side(&mut self.next_backward, &mut self.backward) {
            return Some(Err(err));
        }
        let pick_forward = match (&self.next_forward, &self.next_backward) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((_, forward_millis)), Some((_, backward_millis))) => {
                forward_millis - self.target_millis <= self.target_millis - backward_millis
            }
        };
        let picked = if pick_forward {
            self.next_forward.take()
        } else {
            self.next_backward.take()
        };
        picked.map(|(capture, _)| Ok(capture))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
