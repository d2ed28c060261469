//! RocksDB-backed capture index for web archive collections.
//!
//! A [`DataStore`] manages one [`Index`] per collection. Each index stores
//! packed capture records under keys sorted by `(urlkey, timestamp)`,
//! answers CDX queries through [`Query`], enforces access control through
//! the embedded rule engine, and records every committed batch in a
//! changelog that downstream replicas replay.
//!
//! ```no_run
//! use cdxhive_core::Capture;
//! use cdxhive_index::{DataStore, StoreConfig, TIMESTAMP_MAX};
//! use cdxhive_surt::UrlCanonicalizer;
//!
//! # fn main() -> cdxhive_index::Result<()> {
//! let store = DataStore::open("data", StoreConfig::default())?;
//! let index = store.index("web", true)?.expect("created on demand");
//! let canonicalizer = UrlCanonicalizer::new();
//!
//! let mut batch = index.batch();
//! let line = "- 20050614070159 http://nla.gov.au/ text/html 200 - - 337023 crawl0";
//! batch.put_capture(Capture::from_cdx_line(line, &canonicalizer)?)?;
//! batch.commit()?;
//!
//! for capture in index.query("au,gov,nla)/", 0, TIMESTAMP_MAX, None)? {
//!     println!("{}", capture?.to_cdx_line(false));
//! }
//! # Ok(())
//! # }
//! ```

pub mod changelog;
pub mod error;
pub mod filter;
pub mod index;
pub mod query;
pub mod store;

pub use changelog::{CfId, ChangeEvent, ChangeOp, ChangeRecord, CHANGELOG_CF};
pub use error::{Error, Result};
pub use filter::{CollapseToFirst, CollapseToLast, Filter};
pub use index::{
    host_from_surt, Alias, Aliases, Batch, Captures, ClosestCaptures, Index, ALIAS_CF,
    TIMESTAMP_MAX,
};
pub use query::{
    MatchType, OutputFormat, Query, Sort, DEFAULT_FIELDS, DEFAULT_FIELDS_CDX14,
};
pub use store::{DataStore, StoreConfig};
