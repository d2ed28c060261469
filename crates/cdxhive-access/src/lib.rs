//! # CdxHive Access Control
//!
//! Rules that decide which captures each access point may see. A rule binds
//! URL patterns to a policy; a policy names the access points it admits.
//! Rules can be limited to capture-time windows, access-time windows and
//! calendar embargo periods.
//!
//! The [`AccessControl`] engine persists rules and policies in RocksDB column
//! families and mirrors them into an in-memory radix prefix tree so that
//! query result filtering costs one short tree walk per URL.
//!
//! ```no_run
//! use cdxhive_access::{AccessControl, AccessRule};
//! use chrono::Utc;
//! # fn demo(db: std::sync::Arc<rocksdb::DB>) -> cdxhive_access::Result<()> {
//! let control = AccessControl::open(db)?;
//! let mut rule = AccessRule::default();
//! rule.url_patterns.push("*.example.org".to_string());
//! rule.policy_id = Some(2); // seeded "No Access" policy
//! rule.enabled = true;
//! control.put_rule(rule)?;
//!
//! let now = Utc::now();
//! let decision = control.check_access("public", "http://example.org/", now, now);
//! assert!(!decision.allowed);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
mod radix;
pub mod rules;

pub use engine::{AccessControl, CaptureAccessFilter, POLICY_CF, RULE_CF};
pub use error::{Error, Result};
pub use rules::{
    canon_ssurt, to_ssurt_prefixes, AccessDecision, AccessPolicy, AccessRule, DateRange, Period,
    RuleError,
};
