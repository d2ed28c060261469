//! # URL Canonicalization for Web Archive Indexing
//!
//! Everything needed to turn raw crawled URLs into stable, sortable index
//! keys: a wayback-compatible canonicalizer, SURT (reversed host) key
//! construction and pywb fuzzy rule matching.
//!
//! ```
//! use cdxhive_surt::UrlCanonicalizer;
//!
//! let canon = UrlCanonicalizer::new();
//! let key = canon.surt_canonicalize("http://www.Example.com/A?b=1&a=2");
//! assert_eq!(key, "com,example)/a?a=2&b=1");
//! ```

pub mod canon;
pub mod error;
pub mod fuzzy;

pub use canon::{canonicalize, to_unschemed_surt, UrlCanonicalizer};
pub use error::{Error, Result};
pub use fuzzy::FuzzyRule;
