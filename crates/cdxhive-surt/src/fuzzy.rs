//! Fuzzy Canonicalization Rules
//!
//! Some sites serve the same content under URLs that differ in volatile query
//! parameters (timestamps, signatures, CDN tokens). pywb ships a rules.yaml
//! describing how to reduce such URLs to a stable "fuzzy" key and this module
//! parses the subset of that format we understand:
//!
//! ```yaml
//! rules:
//! - url_prefix: 'com,twitter)/i/timeline'
//!   fuzzy_lookup:
//!   - max_position
//!   - include_entities
//! - url_prefix: 'com,staticflickr,'
//!   fuzzy_lookup:
//!     match: '([0-9]+_[a-z0-9]+).*?.jpg'
//!     replace: '/'
//! ```
//!
//! `fuzzy_lookup` may be a regex string, a list of query parameter names or a
//! map with `match`, `replace`, `find_all` and `type` options. Rule entries
//! missing either `url_prefix` or `fuzzy_lookup` are skipped so pywb files
//! with unrelated rule types load cleanly. A rule rewrites a matching SURT to
//! `fuzzy:{prefix}{captured-groups-joined-by-&}`.

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RulesFile {
    rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize)]
struct RuleConfig {
    url_prefix: Option<StringOrList>,
    fuzzy_lookup: Option<LookupConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s],
            StringOrList::Many(list) => list,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupConfig {
    Pattern(String),
    Args(Vec<String>),
    Settings {
        #[serde(rename = "match")]
        match_spec: Option<MatchConfig>,
        replace: Option<String>,
        #[serde(default)]
        find_all: bool,
        #[serde(rename = "type")]
        rule_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchConfig {
    Pattern(String),
    Args(Vec<String>),
    Composed {
        #[serde(default)]
        regex: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl MatchConfig {
    fn into_regex_text(self) -> String {
        match self {
            MatchConfig::Pattern(s) => s,
            MatchConfig::Args(args) => make_query_match_regex(&args),
            MatchConfig::Composed { regex, args } => {
                format!("{}{}", regex, make_query_match_regex(&args))
            }
        }
    }
}

/// Builds a regex matching the given query parameters in sorted order, each
/// wrapped in a capture group, e.g. `[?&](id=[^&]+).*[?&](itag=[^&]+)`.
fn make_query_match_regex(params: &[String]) -> String {
    let mut params: Vec<&String> = params.iter().collect();
    params.sort();
    params
        .iter()
        .map(|p| format!("[?&]({}=[^&]+)", regex::escape(p)))
        .collect::<Vec<String>>()
        .join(".*")
}

/// A single fuzzy canonicalization rule from a pywb rules.yaml file
#[derive(Debug)]
pub struct FuzzyRule {
    url_prefixes: Vec<String>,
    pattern: Regex,
    replace_after: String,
    find_all: bool,
    is_domain: bool,
}

impl FuzzyRule {
    fn from_config(config: RuleConfig) -> Result<Option<FuzzyRule>> {
        let (prefixes, lookup) = match (config.url_prefix, config.fuzzy_lookup) {
            (Some(prefixes), Some(lookup)) => (prefixes, lookup),
            _ => return Ok(None),
        };

        let mut replace_after = "?".to_string();
        let mut find_all = false;
        let mut is_domain = false;
        let regex_text = match lookup {
            LookupConfig::Pattern(s) => s,
            LookupConfig::Args(args) => make_query_match_regex(&args),
            LookupConfig::Settings {
                match_spec,
                replace,
                find_all: find_all_option,
                rule_type,
            } => {
                let match_spec = match_spec.ok_or_else(|| {
                    Error::Config("fuzzy_lookup must have a match option".to_string())
                })?;
                if let Some(replace) = replace {
                    replace_after = replace;
                }
                find_all = find_all_option;
                is_domain = rule_type.as_deref() == Some("domain");
                match_spec.into_regex_text()
            }
        };

        Ok(Some(FuzzyRule {
            url_prefixes: prefixes.into_vec(),
            pattern: Regex::new(&regex_text)?,
            replace_after,
            find_all,
            is_domain,
        }))
    }

    /// Applies this rule to a canonicalized SURT. Returns the rewritten fuzzy
    /// key, or None if the rule's prefixes or pattern don't match.
    pub fn apply(&self, surt: &str) -> Option<String> {
        for prefix in &self.url_prefixes {
            if !surt.starts_with(prefix.as_str()) {
                continue;
            }

            let groups: Vec<&str> = if self.find_all {
                let matches: Vec<&str> = self.pattern.find_iter(surt).map(|m| m.as_str()).collect();
                if matches.is_empty() {
                    continue;
                }
                matches
            } else {
                match self.pattern.captures(surt) {
                    Some(caps) => (1..caps.len())
                        .filter_map(|i| caps.get(i))
                        .map(|m| m.as_str())
                        .collect(),
                    None => continue,
                }
            };

            let pref = if self.is_domain {
                format!("{}?", prefix)
            } else if let Some(index) = surt.find(&self.replace_after) {
                surt[..index + self.replace_after.len()].to_string()
            } else {
                format!("{}?", surt)
            };

            return Some(format!("fuzzy:{}{}", pref, groups.join("&")));
        }
        None
    }
}

pub(crate) fn load_rules(yaml: &str) -> Result<Vec<FuzzyRule>> {
    let file: RulesFile = serde_yaml::from_str(yaml)?;
    let mut rules = Vec::new();
    for config in file.rules {
        if let Some(rule) = FuzzyRule::from_config(config)? {
            rules.push(rule);
        }
    }
    Ok(rules)
}
