//! # Capture Records and Their Packed Encoding
//!
//! Core data model for the capture index: the [`Capture`] record type, its
//! space-efficient binary key/value encoding, CDX/CDXJ line parsing and the
//! varint and base32 primitives the codec is built on.
//!
//! A capture describes one archived snapshot of a URL. In the index it is
//! stored as a bytewise-sortable key (SURT urlkey + big-endian timestamp) and
//! a varint-packed value, so a range scan over keys walks captures in
//! (url, time) order.
//!
//! ```
//! use cdxhive_core::Capture;
//! use cdxhive_surt::UrlCanonicalizer;
//!
//! let canon = UrlCanonicalizer::new();
//! let capture = Capture::from_cdx_line(
//!     "- 20050614070159 http://www.archive.org/ text/html 200 SHA - 49 w1.warc.gz",
//!     &canon,
//! ).unwrap();
//! assert_eq!(capture.urlkey, "org,archive)/");
//!
//! let key = capture.encode_key(0).unwrap();
//! let value = capture.encode_value(3).unwrap();
//! let copy = Capture::decode(&key, &value).unwrap();
//! assert_eq!(copy.original, "http://www.archive.org/");
//! ```

pub mod base32;
pub mod capture;
pub mod cdxline;
pub mod error;
pub mod varint;

pub use capture::{timestamp_to_date, timestamp_to_millis, Capture};
pub use error::{Error, Result};
