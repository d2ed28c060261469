//! Command line configuration.

use std::path::PathBuf;

use clap::Parser;

use cdxhive_index::StoreConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "cdxhive")]
#[command(about = "Web archive capture index server", long_about = None)]
pub struct Config {
    /// Address to bind the HTTP listener to
    #[arg(short = 'b', long = "bind", env = "CDXHIVE_BIND", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Port to listen on
    #[arg(short = 'p', long, env = "CDXHIVE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory to store the indexes in
    #[arg(short = 'd', long = "data", env = "CDXHIVE_DATA", default_value = "data")]
    pub data_dir: PathBuf,

    /// Limit on open storage files per collection
    #[arg(short = 'm', long, env = "CDXHIVE_MAX_OPEN_FILES")]
    pub max_open_files: Option<i32>,

    /// Report the 14 field CDX format by default instead of CDX11
    #[arg(short = 'x', long, env = "CDXHIVE_CDX14")]
    pub cdx14: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// YAML file of fuzzy canonicalization rules in pywb format
    #[arg(short = 'y', long, env = "CDXHIVE_FUZZY_RULES", value_name = "FILE")]
    pub fuzzy_rules: Option<PathBuf>,

    /// Key format version for newly created collections
    #[arg(long, env = "CDXHIVE_INDEX_VERSION", default_value_t = 3)]
    pub index_version: u32,

    /// Seconds of changelog history to retain for replicas, 0 keeps everything
    #[arg(long, env = "CDXHIVE_REPLICATION_WINDOW", default_value_t = 0, value_name = "SECONDS")]
    pub replication_window: u64,

    /// Collection URL on a primary to poll for changes. Repeatable, and
    /// switches this node into secondary mode.
    #[arg(long = "primary", env = "CDXHIVE_PRIMARY", value_name = "COLLECTION_URL")]
    pub primaries: Vec<String>,

    /// Seconds between polls of each primary
    #[arg(long, env = "CDXHIVE_UPDATE_INTERVAL", default_value_t = 10, value_name = "SECONDS")]
    pub update_interval: u64,

    /// Upper bound in bytes on each batch fetched from a primary
    #[arg(long, env = "CDXHIVE_BATCH_SIZE", default_value_t = 10 * 1024 * 1024, value_name = "BYTES")]
    pub batch_size: u64,

    /// Accept local writes even while replicating from a primary
    #[arg(long, env = "CDXHIVE_ACCEPT_WRITES")]
    pub accept_writes: bool,
}

impl Config {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            index_version: self.index_version,
            max_open_files: self.max_open_files,
            replication_window_secs: match self.replication_window {
                0 => None,
                secs => Some(secs),
            },
        }
    }

    /// A secondary refuses capture writes unless `--accept-writes` is set.
    pub fn read_only(&self) -> bool {
        !self.primaries.is_empty() && !self.accept_writes
    }
}
