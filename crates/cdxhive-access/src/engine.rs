//! Access Control Engine
//!
//! Decides which captures a given access point is allowed to see. Rules and
//! policies are persisted in their own RocksDB column families and mirrored
//! into memory: an id-ordered map for listing and lookup, plus a radix
//! prefix tree keyed by SSURT so per-capture filtering during a scan is one
//! short tree walk instead of a rule-table walk.
//!
//! ## Rule Matching
//! A URL is canonicalized to its SSURT and the prefix tree is walked with
//! `ssurt + " "`, collecting the rules filed under every leading slice of
//! it, shortest first, so the rules come back most general first. The
//! decision procedure then takes the *last* enabled rule whose date windows
//! admit the capture, which gives more specific rules precedence over
//! broader ones.
//!
//! ## Consistency
//! All mutation happens under a single writer lock and the durable RocksDB
//! write is made inside the critical section, so the in-memory projections
//! can never diverge from what a restart would load. Readers see the old
//! rule set until the write completes; that window is accepted rather than
//! blocking queries on rule edits.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, IteratorMode, DB};
use tracing::warn;

use cdxhive_core::{timestamp_to_date, Capture};

use crate::error::{Error, Result};
use crate::radix::RadixTree;
use crate::rules::{canon_ssurt, AccessDecision, AccessPolicy, AccessRule};

/// Column family holding JSON rules keyed by 8 byte big-endian id.
pub const RULE_CF: &str = "access-rule";
/// Column family holding JSON policies keyed by 8 byte big-endian id.
pub const POLICY_CF: &str = "access-policy";

/// Manages access control rules and policies for one collection.
pub struct AccessControl {
    db: Arc<DB>,
    state: RwLock<State>,
}

struct State {
    policies: BTreeMap<u64, AccessPolicy>,
    rules: BTreeMap<u64, AccessRule>,
    prefixes: RulesBySsurt,
    next_rule_id: u64,
    next_policy_id: u64,
}

impl State {
    fn rules_matching(&self, ssurt: &str) -> Vec<AccessRule> {
        self.prefixes
            .prefixing(ssurt)
            .into_iter()
            .filter_map(|id| self.rules.get(&id).cloned())
            .collect()
    }
}

impl AccessControl {
    /// Opens the engine over the rule and policy column families, loading
    /// everything persisted there into memory. Rules whose patterns can no
    /// longer be expanded to prefixes are kept but left out of the prefix
    /// index, with a warning, rather than aborting startup. When the store
    /// holds no policies at all, a default Public / Staff Only / No Access
    /// set is seeded.
    pub fn open(db: Arc<DB>) -> Result<AccessControl> {
        let rule_cf = cf(&db, RULE_CF)?;
        let policy_cf = cf(&db, POLICY_CF)?;

        let mut policies = BTreeMap::new();
        for entry in db.iterator_cf(policy_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            let policy: AccessPolicy = serde_json::from_slice(&value)?;
            if let Some(id) = policy.id.or_else(|| decode_id(&key)) {
                policies.insert(id, policy);
            }
        }

        let mut rules = BTreeMap::new();
        let mut prefixes = RulesBySsurt::default();
        for entry in db.iterator_cf(rule_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            let rule: AccessRule = serde_json::from_slice(&value)?;
            let id = match rule.id.or_else(|| decode_id(&key)) {
                Some(id) => id,
                None => continue,
            };
            match rule.ssurt_prefixes() {
                Ok(rule_prefixes) => prefixes.put(id, &rule_prefixes),
                Err(err) => warn!(rule = id, "skipping unindexable access rule: {}", err),
            }
            rules.insert(id, rule);
        }

        let next_rule_id = next_id(&db, rule_cf);
        let next_policy_id = next_id(&db, policy_cf);
        let needs_seed = policies.is_empty();

        let control = AccessControl {
            db,
            state: RwLock::new(State {
                policies,
                rules,
                prefixes,
                next_rule_id,
                next_policy_id,
            }),
        };

        if needs_seed {
            control.put_policy(AccessPolicy::new("Public", &["public", "staff"]))?;
            control.put_policy(AccessPolicy::new("Staff Only", &["staff"]))?;
            control.put_policy(AccessPolicy::new("No Access", &[]))?;
        }
        Ok(control)
    }

    /// Saves a rule, which must reference an existing policy. Returns the
    /// generated id when the rule was new.
    pub fn put_rule(&self, mut rule: AccessRule) -> Result<Option<u64>> {
        let rule_cf = cf(&self.db, RULE_CF)?;
        let mut state = self.state.write().unwrap();

        let policy_id = rule.policy_id.ok_or(Error::MissingPolicyId)?;
        if !state.policies.contains_key(&policy_id) {
            return Err(Error::NoSuchPolicy(policy_id));
        }
        let prefixes = rule.ssurt_prefixes()?;

        let now = Utc::now();
        let (id, generated) = match rule.id {
            Some(id) => (id, None),
            None => {
                let id = state.next_rule_id;
                rule.id = Some(id);
                rule.created = Some(now);
                (id, Some(id))
            }
        };
        state.next_rule_id = state.next_rule_id.max(id + 1);
        rule.modified = Some(now);

        self.db
            .put_cf(rule_cf, id.to_be_bytes(), serde_json::to_vec(&rule)?)?;

        if let Some(previous) = state.rules.insert(id, rule) {
            state.prefixes.remove(id, &previous);
        }
        state.prefixes.put(id, &prefixes);
        Ok(generated)
    }

    /// Saves a policy. Returns the generated id when the policy was new.
    pub fn put_policy(&self, mut policy: AccessPolicy) -> Result<Option<u64>> {
        let policy_cf = cf(&self.db, POLICY_CF)?;
        let mut state = self.state.write().unwrap();

        let (id, generated) = match policy.id {
            Some(id) => (id, None),
            None => {
                let id = state.next_policy_id;
                policy.id = Some(id);
                (id, Some(id))
            }
        };
        state.next_policy_id = state.next_policy_id.max(id + 1);

        self.db
            .put_cf(policy_cf, id.to_be_bytes(), serde_json::to_vec(&policy)?)?;
        state.policies.insert(id, policy);
        Ok(generated)
    }

    /// Deletes a rule from the store and both in-memory projections.
    /// Returns false if no rule had the given id.
    pub fn delete_rule(&self, rule_id: u64) -> Result<bool> {
        let rule_cf = cf(&self.db, RULE_CF)?;
        let mut state = self.state.write().unwrap();
        let rule = match state.rules.remove(&rule_id) {
            Some(rule) => rule,
            None => return Ok(false),
        };
        state.prefixes.remove(rule_id, &rule);
        self.db.delete_cf(rule_cf, rule_id.to_be_bytes())?;
        Ok(true)
    }

    pub fn rule(&self, rule_id: u64) -> Option<AccessRule> {
        self.state.read().unwrap().rules.get(&rule_id).cloned()
    }

    pub fn policy(&self, policy_id: u64) -> Option<AccessPolicy> {
        self.state.read().unwrap().policies.get(&policy_id).cloned()
    }

    /// All rules ordered by id.
    pub fn list_rules(&self) -> Vec<AccessRule> {
        self.state.read().unwrap().rules.values().cloned().collect()
    }

    /// All policies ordered by id.
    pub fn list_policies(&self) -> Vec<AccessPolicy> {
        self.state.read().unwrap().policies.values().cloned().collect()
    }

    /// All rules that may apply to the given URL, most general first.
    pub fn rules_for_url(&self, url: &str) -> Vec<AccessRule> {
        self.rules_for_ssurt(&canon_ssurt(url))
    }

    /// All rules filed under a prefix of the given SSURT, most general first.
    pub fn rules_for_ssurt(&self, ssurt: &str) -> Vec<AccessRule> {
        self.state.read().unwrap().rules_matching(ssurt)
    }

    /// Decides whether a capture of `url` taken at `capture_time` may be
    /// served through `access_point` at `access_time`.
    pub fn check_access(
        &self,
        access_point: &str,
        url: &str,
        capture_time: DateTime<Utc>,
        access_time: DateTime<Utc>,
    ) -> AccessDecision {
        let state = self.state.read().unwrap();
        let rules = state.rules_matching(&canon_ssurt(url));
        decide(&state.policies, &rules, access_point, capture_time, access_time)
    }
}

/// Applies the decision procedure: the last enabled rule whose date windows
/// admit the (capture, access) pair wins; a winning rule denies unless its
/// policy lists the access point; no matching rule means allow. A winning
/// rule whose policy is unknown also allows, so a dangling policy reference
/// can never lock captures away.
fn decide(
    policies: &BTreeMap<u64, AccessPolicy>,
    rules: &[AccessRule],
    access_point: &str,
    capture_time: DateTime<Utc>,
    access_time: DateTime<Utc>,
) -> AccessDecision {
    let mut matching = None;
    for rule in rules {
        if rule.enabled && rule.matches_dates(capture_time, access_time) {
            matching = Some(rule);
        }
    }
    match matching {
        Some(rule) => {
            let policy = rule.policy_id.and_then(|id| policies.get(&id));
            let allowed =
                policy.map_or(true, |policy| policy.access_points.contains(access_point));
            AccessDecision {
                allowed,
                rule: Some(rule.clone()),
                policy: policy.cloned(),
            }
        }
        None => AccessDecision {
            allowed: true,
            rule: None,
            policy: None,
        },
    }
}

/// Per-query capture filter. Queries return long runs of captures for the
/// same URL, so the rule list resolved for the most recent URL is cached
/// between calls.
pub struct CaptureAccessFilter {
    control: Arc<AccessControl>,
    access_point: String,
    access_time: DateTime<Utc>,
    previous_url: Option<String>,
    previous_rules: Vec<AccessRule>,
}

impl CaptureAccessFilter {
    pub fn new(
        control: Arc<AccessControl>,
        access_point: &str,
        access_time: DateTime<Utc>,
    ) -> CaptureAccessFilter {
        CaptureAccessFilter {
            control,
            access_point: access_point.to_string(),
            access_time,
            previous_url: None,
            previous_rules: Vec::new(),
        }
    }

    /// True if the capture may be served through this filter's access point.
    pub fn test(&mut self, capture: &Capture) -> Result<bool> {
        if self.previous_url.as_deref() != Some(capture.original.as_str()) {
            self.previous_rules = self.control.rules_for_url(&capture.original);
            self.previous_url = Some(capture.original.clone());
        }
        let capture_time = timestamp_to_date(capture.timestamp)?;
        let state = self.control.state.read().unwrap();
        let decision = decide(
            &state.policies,
            &self.previous_rules,
            &self.access_point,
            capture_time,
            self.access_time,
        );
        Ok(decision.allowed)
    }
}

/// Secondary index mapping SSURT prefixes to the rules filed under them. A
/// rule appears once per prefix its patterns expand to.
#[derive(Default)]
struct RulesBySsurt {
    tree: RadixTree,
}

impl RulesBySsurt {
    fn put(&mut self, id: u64, prefixes: &[String]) {
        for prefix in prefixes {
            self.tree.insert(prefix, id);
        }
    }

    fn remove(&mut self, id: u64, rule: &AccessRule) {
        match rule.ssurt_prefixes() {
            Ok(prefixes) => {
                for prefix in &prefixes {
                    self.tree.remove(prefix, id);
                }
            }
            // unindexable rule, scrub the id from every node
            Err(_) => self.tree.remove_id(id),
        }
    }

    /// Ids of all rules whose stored prefix is a prefix of `ssurt + " "`,
    /// most general first. The trailing space makes exact-URL prefixes
    /// (stored space-suffixed) match only the identical URL and not
    /// continuations of it.
    fn prefixing(&self, ssurt: &str) -> Vec<u64> {
        self.tree.ids_prefixing(&format!("{ssurt} "))
    }
}

fn cf<'db>(db: &'db DB, name: &'static str) -> Result<&'db ColumnFamily> {
    db.cf_handle(name).ok_or(Error::MissingColumnFamily(name))
}

fn decode_id(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

fn next_id(db: &DB, cf: &ColumnFamily) -> u64 {
    let mut iter = db.raw_iterator_cf(cf);
    iter.seek_to_last();
    if iter.valid() {
        iter.key().and_then(decode_id).map_or(0, |id| id + 1)
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DateRange, Period};
    use chrono::TimeZone;
    use rocksdb::Options;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> Arc<DB> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        Arc::new(DB::open_cf(&opts, dir.path(), ["default", RULE_CF, POLICY_CF]).unwrap())
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn rule_for(patterns: &[&str], policy_id: u64) -> AccessRule {
        AccessRule {
            policy_id: Some(policy_id),
            url_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            enabled: true,
            ..Default::default()
        }
    }

    fn ids(rules: &[AccessRule]) -> Vec<u64> {
        rules.iter().filter_map(|rule| rule.id).collect()
    }

    // ---- policies ----

    #[test]
    fn test_default_policies_are_seeded() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let names: Vec<String> = control
            .list_policies()
            .into_iter()
            .map(|policy| policy.name)
            .collect();
        assert_eq!(names, vec!["Public", "Staff Only", "No Access"]);
    }

    #[test]
    fn test_rule_requires_an_existing_policy() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let err = control.put_rule(rule_for(&["*.gov.au"], 404)).unwrap_err();
        assert!(matches!(err, Error::NoSuchPolicy(404)));

        let no_policy = AccessRule {
            url_patterns: vec!["*.gov.au".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            control.put_rule(no_policy),
            Err(Error::MissingPolicyId)
        ));
    }

    // ---- rule lookup and decisions ----

    #[test]
    fn test_rule_lookup_and_decisions() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();

        let public_id = control
            .put_policy(AccessPolicy::new("Everyone", &["public", "staff"]))
            .unwrap()
            .unwrap();
        let staff_id = control
            .put_policy(AccessPolicy::new("Curators", &["staff"]))
            .unwrap()
            .unwrap();

        let rule_id = control.put_rule(rule_for(&["*.gov.au"], public_id)).unwrap().unwrap();
        let stored = control.rule(rule_id).unwrap();
        assert_eq!(stored.url_patterns, vec!["*.gov.au".to_string()]);
        assert!(stored.created.is_some());
        assert!(stored.modified.is_some());

        control.put_rule(rule_for(&["*.nla.gov.au"], public_id)).unwrap();
        let mut restricted = rule_for(&["*.example.gov.au"], staff_id);
        restricted.public_message = Some("Explanatory message".to_string());
        control.put_rule(restricted).unwrap();

        // general rules come back before specific ones
        let rules = control.rules_for_url("http://nla.gov.au/hello.html");
        assert_eq!(ids(&rules), vec![0, 1]);
        assert_eq!(ids(&control.list_rules()), vec![0, 1, 2]);

        let now = Utc::now();
        let decision = control.check_access("public", "http://nla.gov.au/hello.html", now, now);
        assert!(decision.allowed);

        let decision =
            control.check_access("public", "http://restricted.example.gov.au/hello.html", now, now);
        assert!(!decision.allowed);
        assert_eq!(decision.public_message(), Some("Explanatory message"));
        let decision =
            control.check_access("staff", "http://restricted.example.gov.au/hello.html", now, now);
        assert!(decision.allowed);
    }

    #[test]
    fn test_exact_pattern_matches_canonical_equivalents_only() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let staff_id = control
            .put_policy(AccessPolicy::new("Curators", &["staff"]))
            .unwrap()
            .unwrap();

        control
            .put_rule(rule_for(&["http://www.example.org/particular/page.htm"], staff_id))
            .unwrap();

        let now = Utc::now();
        // default port and www prefix canonicalize away
        let decision = control.check_access(
            "public",
            "http://www.example.org:80/particular/page.htm",
            now,
            now,
        );
        assert!(!decision.allowed);
        // a longer path must not be covered by the exact rule
        let decision = control.check_access(
            "public",
            "http://www.example.org/particular/page.html",
            now,
            now,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn test_bare_star_rule_is_a_default_for_every_url() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        // seeded No Access policy has id 2
        control.put_rule(rule_for(&["*"], 2)).unwrap();

        let now = Utc::now();
        assert!(!control.check_access("public", "http://anything.example/", now, now).allowed);
        assert!(!control.check_access("public", "https://other.org/deep/path?q=1", now, now).allowed);
    }

    #[test]
    fn test_disabled_rules_never_match() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let mut rule = rule_for(&["*.example.com"], 2);
        rule.enabled = false;
        let rule_id = control.put_rule(rule).unwrap().unwrap();

        // still stored and listed, just skipped when deciding
        assert_eq!(control.rules_for_url("http://example.com/").len(), 1);
        let now = Utc::now();
        let decision = control.check_access("public", "http://example.com/", now, now);
        assert!(decision.allowed);
        assert!(decision.rule.is_none());

        let mut rule = control.rule(rule_id).unwrap();
        rule.enabled = true;
        control.put_rule(rule).unwrap();
        assert!(!control.check_access("public", "http://example.com/", now, now).allowed);
    }

    // ---- embargo ----

    #[test]
    fn test_embargoed_capture_window() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();

        let mut rule = rule_for(&["*.example.com"], 2);
        rule.captured = Some(DateRange {
            start: Some(utc(2000, 1, 1)),
            end: Some(utc(2010, 1, 1)),
        });
        rule.period = Some(Period::of_years(1));
        control.put_rule(rule).unwrap();

        let capture_time = utc(2005, 1, 1);
        let denied =
            control.check_access("public", "http://example.com/page", capture_time, utc(2005, 6, 1));
        assert!(!denied.allowed);

        let allowed =
            control.check_access("public", "http://example.com/page", capture_time, utc(2006, 6, 2));
        assert!(allowed.allowed);

        // captures outside the window are never embargoed
        let outside =
            control.check_access("public", "http://example.com/page", utc(2015, 1, 1), utc(2015, 2, 1));
        assert!(outside.allowed);
    }

    #[test]
    fn test_rule_without_resolvable_policy_allows() {
        let rule = AccessRule {
            policy_id: Some(404),
            url_patterns: vec!["*.example.com".to_string()],
            enabled: true,
            ..Default::default()
        };
        let now = Utc::now();
        let decision = decide(&BTreeMap::new(), &[rule], "public", now, now);
        assert!(decision.allowed);

        let unreferenced = AccessRule {
            url_patterns: vec!["*.example.com".to_string()],
            enabled: true,
            ..Default::default()
        };
        let decision = decide(&BTreeMap::new(), &[unreferenced], "public", now, now);
        assert!(decision.allowed);
    }

    // ---- mutation ----

    #[test]
    fn test_delete_rule() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let rule_id = control.put_rule(rule_for(&["*.gov.au"], 2)).unwrap().unwrap();

        assert_eq!(control.rules_for_url("http://nla.gov.au/").len(), 1);
        assert!(control.delete_rule(rule_id).unwrap());
        assert!(control.rule(rule_id).is_none());
        assert!(control.rules_for_url("http://nla.gov.au/").is_empty());
        assert!(!control.delete_rule(rule_id).unwrap());
    }

    #[test]
    fn test_updating_a_rule_moves_its_prefixes() {
        let dir = TempDir::new().unwrap();
        let control = AccessControl::open(open_db(&dir)).unwrap();
        let rule_id = control.put_rule(rule_for(&["*.gov.au"], 2)).unwrap().unwrap();

        let mut moved = control.rule(rule_id).unwrap();
        moved.url_patterns = vec!["*.example.org".to_string()];
        assert_eq!(control.put_rule(moved).unwrap(), None);

        assert!(control.rules_for_url("http://nla.gov.au/").is_empty());
        assert_eq!(ids(&control.rules_for_url("http://www.example.org/")), vec![rule_id]);
    }

    #[test]
    fn test_rules_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        {
            let control = AccessControl::open(db.clone()).unwrap();
            control.put_rule(rule_for(&["*.gov.au"], 2)).unwrap();
            control.put_rule(rule_for(&["*.example.org"], 2)).unwrap();
        }

        let control = AccessControl::open(db).unwrap();
        assert_eq!(ids(&control.list_rules()), vec![0, 1]);
        assert_eq!(control.list_policies().len(), 3);
        assert_eq!(ids(&control.rules_for_url("http://nla.gov.au/")), vec![0]);
        // ids continue from the persisted tail
        let next = control.put_rule(rule_for(&["*.example.net"], 2)).unwrap();
        assert_eq!(next, Some(2));
    }

    // ---- capture filtering ----

    #[test]
    fn test_capture_filter_caches_by_url() {
        let dir = TempDir::new().unwrap();
        let control = Arc::new(AccessControl::open(open_db(&dir)).unwrap());
        control.put_rule(rule_for(&["*.example.com"], 2)).unwrap();

        let mut filter = CaptureAccessFilter::new(control, "public", Utc::now());

        let mut capture = Capture::default();
        capture.urlkey = "com,example)/".to_string();
        capture.original = "http://example.com/".to_string();
        capture.timestamp = 20050101000000;
        assert!(!filter.test(&capture).unwrap());

        // a second capture of the same URL reuses the cached rule list
        capture.timestamp = 20060101000000;
        assert!(!filter.test(&capture).unwrap());

        let mut open_capture = Capture::default();
        open_capture.urlkey = "org,opensite)/".to_string();
        open_capture.original = "http://opensite.org/".to_string();
        open_capture.timestamp = 20050101000000;
        assert!(filter.test(&open_capture).unwrap());
    }
}
