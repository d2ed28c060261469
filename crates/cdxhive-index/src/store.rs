//! Collection management.
//!
//! A [`DataStore`] owns a data directory with one RocksDB database per
//! collection. Collections are opened lazily on first use and cached for
//! the life of the store, and can be created on demand by writes.

use once_cell::sync::Lazy;
use regex::Regex;
use rocksdb::{
    BlockBasedOptions, ColumnFamilyDescriptor, DBCompactionStyle, DBCompressionType, Options, DB,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

use cdxhive_access::{POLICY_CF, RULE_CF};

use crate::changelog::CHANGELOG_CF;
use crate::error::{Error, Result};
use crate::index::{Index, ALIAS_CF};

static COLLECTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap());

/// Tuning and behavior options shared by every collection in a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Key format for newly written records, 3 or 4.
    pub index_version: u32,
    /// Cap on open file descriptors per collection, unlimited when `None`.
    pub max_open_files: Option<i32>,
    /// Age in seconds after which changelog entries are deleted. `None` or
    /// zero keeps them until explicitly truncated.
    pub replication_window_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> StoreConfig {
        StoreConfig {
            index_version: 3,
            max_open_files: None,
            replication_window_secs: None,
        }
    }
}

/// The set of collections under one data directory.
pub struct DataStore {
    root: PathBuf,
    config: StoreConfig,
    indexes: RwLock<HashMap<String, Arc<Index>>>,
}

impl DataStore {
    pub fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<DataStore> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(DataStore {
            root,
            config,
            indexes: RwLock::new(HashMap::new()),
        })
    }

    /// The index for `collection`, opening or creating it as needed.
    /// Returns `None` when the collection does not exist on disk and
    /// `create_allowed` is false.
    pub fn index(&self, collection: &str, create_allowed: bool) -> Result<Option<Arc<Index>>> {
        if !COLLECTION_NAME.is_match(collection) {
            return Err(Error::InvalidCollectionName(collection.to_string()));
        }
        if let Some(index) = self.indexes.read().unwrap().get(collection) {
            return Ok(Some(index.clone()));
        }
        let mut indexes = self.indexes.write().unwrap();
        if let Some(index) = indexes.get(collection) {
            return Ok(Some(index.clone()));
        }
        let path = self.root.join(collection);
        if !path.is_dir() && !create_allowed {
            return Ok(None);
        }
        info!(collection, path = %path.display(), "opening collection");
        let db = Arc::new(open_db(&path, &self.config)?);
        let index = Arc::new(Index::new(collection, db, &self.config)?);
        indexes.insert(collection.to_string(), index.clone());
        Ok(Some(index))
    }

    /// Collections present on disk, sorted by name.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if COLLECTION_NAME.is_match(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn open_db(path: &Path, config: &StoreConfig) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    if let Some(limit) = config.max_open_files {
        options.set_max_open_files(limit);
    }

    let mut cf_options = Options::default();
    cf_options.set_compaction_style(DBCompactionStyle::Level);
    cf_options.set_write_buffer_size(64 * 1024 * 1024);
    cf_options.set_target_file_size_base(64 * 1024 * 1024);
    cf_options.set_target_file_size_multiplier(2);
    cf_options.set_max_bytes_for_level_base(512 * 1024 * 1024);
    cf_options.set_compression_type(DBCompressionType::Snappy);
    let mut table = BlockBasedOptions::default();
    table.set_block_size(22 * 1024);
    cf_options.set_block_based_table_factory(&table);

    let families = ["default", ALIAS_CF, CHANGELOG_CF, RULE_CF, POLICY_CF]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, cf_options.clone()));
    Ok(DB::open_cf_descriptors(&options, path, families)?)
}
