//! Access Rule and Policy Model
//!
//! Rules bind URL patterns to a policy. A policy names the access points
//! (for example "public" or "staff") that may see captures it governs.
//!
//! ## URL Patterns
//! Three pattern shapes are supported:
//! - `*.example.org` restricts a whole domain including every subdomain
//! - `http://example.org/foo*` restricts everything under a URL prefix
//! - any other pattern restricts exactly one canonicalized URL
//!
//! Patterns are expanded to SSURT prefixes with [`to_ssurt_prefixes`] and
//! filed in the in-memory prefix index so capture filtering is a cheap
//! string-prefix probe rather than a table scan.
//!
//! ## Time Windows and Embargoes
//! A rule may be limited to a capture-time window, an access-time window and
//! an embargo period measured from capture time. The rule applies only while
//! all three admit the (capture time, access time) pair; an embargoed rule
//! therefore stops matching once the embargo lapses, which is what makes
//! "deny for the first year after capture" expressible as a No Access rule.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, Local, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A half-open pair of optional bounds. Both comparisons are strict, so a
/// date equal to either bound falls outside the range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| start < date) && self.end.map_or(true, |end| end > date)
    }
}

/// Calendar length of an embargo, in whole years, months and days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default)]
    pub years: u32,
    #[serde(default)]
    pub months: u32,
    #[serde(default)]
    pub days: u32,
}

impl Period {
    pub fn of_years(years: u32) -> Period {
        Period { years, months: 0, days: 0 }
    }

    pub fn of_days(days: u32) -> Period {
        Period { years: 0, months: 0, days }
    }

    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0
    }
}

/// A named set of access points. Captures restricted by a rule are visible
/// only through the access points its policy lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub access_points: BTreeSet<String>,
}

impl AccessPolicy {
    pub fn new(name: &str, access_points: &[&str]) -> AccessPolicy {
        AccessPolicy {
            id: None,
            name: name.to_string(),
            access_points: access_points.iter().map(|point| point.to_string()).collect(),
        }
    }
}

/// One access control rule: URL patterns plus the policy and time windows
/// that govern them. Everything past `enabled` is operator metadata carried
/// for audit purposes and never consulted when deciding access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<u64>,
    pub url_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_message: Option<String>,
    pub enabled: bool,

    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
}

impl AccessRule {
    /// True if this rule applies to the given capture and access times.
    pub fn matches_dates(&self, capture_time: DateTime<Utc>, access_time: DateTime<Utc>) -> bool {
        let captured_ok = self
            .captured
            .as_ref()
            .map_or(true, |range| range.contains(capture_time));
        let accessed_ok = self
            .accessed
            .as_ref()
            .map_or(true, |range| range.contains(access_time));
        let period_applies = match self.period {
            None => true,
            Some(period) if period.is_zero() => true,
            Some(period) => is_within_period(capture_time, access_time, period),
        };
        captured_ok && accessed_ok && period_applies
    }

    /// SSURT prefixes this rule should be filed under, one or two per
    /// pattern. Fails if any pattern is unusable.
    pub fn ssurt_prefixes(&self) -> Result<Vec<String>> {
        let mut prefixes = Vec::new();
        for pattern in &self.url_patterns {
            prefixes.extend(to_ssurt_prefixes(pattern)?);
        }
        Ok(prefixes)
    }

    /// Checks the rule is well-formed enough to save, reporting one error per
    /// offending pattern. An index of -1 refers to the rule as a whole.
    pub fn validate(&self) -> Vec<RuleError> {
        let mut errors = Vec::new();
        for (i, pattern) in self.url_patterns.iter().enumerate() {
            if pattern.starts_with("*.") && pattern.contains('/') {
                errors.push(RuleError::new(
                    self.id,
                    i as i32,
                    "can't use a domain wildcard with path",
                ));
            } else if pattern.is_empty() {
                errors.push(RuleError::new(self.id, i as i32, "URL pattern can't be blank"));
            }
        }
        if self.url_patterns.is_empty() {
            errors.push(RuleError::new(
                self.id,
                -1,
                "rule must have at least one URL pattern",
            ));
        }
        errors
    }

    /// Case-insensitive search over patterns and free-text fields, used by
    /// the rule listing endpoint.
    pub fn contains(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        self.url_patterns
            .iter()
            .any(|pattern| pattern.to_lowercase().contains(&needle))
            || text_contains(&self.private_comment, &needle)
            || text_contains(&self.public_message, &needle)
            || text_contains(&self.external_id, &needle)
            || text_contains(&self.reason, &needle)
    }
}

fn text_contains(field: &Option<String>, needle: &str) -> bool {
    field
        .as_deref()
        .map_or(false, |text| text.to_lowercase().contains(needle))
}

/// Embargoes are evaluated in the server's local timezone so that a one year
/// period lands on the same calendar date rather than a fixed number of
/// hours, and so behaves intuitively across DST transitions.
fn is_within_period(
    capture_time: DateTime<Utc>,
    access_time: DateTime<Utc>,
    period: Period,
) -> bool {
    let capture_local = capture_time.with_timezone(&Local).naive_local();
    let access_local = access_time.with_timezone(&Local).naive_local();
    let months = period.years.saturating_mul(12).saturating_add(period.months);
    let expiry = capture_local
        .checked_add_months(Months::new(months))
        .and_then(|date| date.checked_add_days(Days::new(u64::from(period.days))));
    match expiry {
        Some(expiry) => access_local < expiry,
        // so far in the future the calendar overflows, still embargoed
        None => true,
    }
}

/// A validation problem with a rule, reported against the offending pattern.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u64>,
    pub pattern_index: i32,
    pub message: String,
}

impl RuleError {
    fn new(rule_id: Option<u64>, pattern_index: i32, message: &str) -> RuleError {
        RuleError {
            rule_id,
            pattern_index,
            message: message.to_string(),
        }
    }
}

/// The outcome of an access check: whether the capture may be served, and
/// the rule and policy that decided it (absent when no rule matched).
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<AccessRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<AccessPolicy>,
}

impl AccessDecision {
    pub fn public_message(&self) -> Option<&str> {
        self.rule.as_ref().and_then(|rule| rule.public_message.as_deref())
    }
}

/// Canonicalized, unschemed SURT used for rule matching. Rules and captures
/// go through the same canonicalizer as the main index, so a rule written
/// for `http://example.com/foo` also covers captures recorded as
/// `https://www.example.com//foo`.
pub fn canon_ssurt(url: &str) -> String {
    cdxhive_surt::to_unschemed_surt(&cdxhive_surt::canonicalize(url))
}

/// Expands one URL pattern into the SSURT prefixes it covers.
///
/// A domain wildcard `*.example.org` covers the apex host, written
/// `org,example)`, and every deeper host, written `org,example,`, so it
/// expands to both prefixes. A trailing `*` is a plain prefix match on the
/// canonicalized form, and a bare `*` becomes the empty prefix which matches
/// everything. Anything else matches exactly one URL, marked with a trailing
/// space so that `)/foo` does not also cover `)/foobar`.
pub fn to_ssurt_prefixes(pattern: &str) -> Result<Vec<String>> {
    if let Some(domain) = pattern.strip_prefix("*.") {
        if pattern.contains('/') {
            return Err(Error::InvalidRule(
                "can't use a domain wildcard with path".to_string(),
            ));
        }
        let reversed = domain
            .split('.')
            .rev()
            .collect::<Vec<_>>()
            .join(",")
            .to_lowercase();
        Ok(vec![format!("{reversed})"), format!("{reversed},")])
    } else if let Some(head) = pattern.strip_suffix('*') {
        if head.is_empty() {
            Ok(vec![String::new()])
        } else {
            Ok(vec![canon_ssurt(head)])
        }
    } else {
        Ok(vec![format!("{} ", canon_ssurt(pattern))])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
