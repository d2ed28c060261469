//! Capture filtering and collapsing for query results.
//!
//! Filter expressions take the form `[~][!]field:expr`. The expression is
//! a regular expression that must match the whole field value, or a plain
//! substring when prefixed with `~`. A `!` inverts the sense. Field names
//! are checked when the filter is built, so a bad expression fails the
//! query instead of surfacing halfway through a result set.
//!
//! Collapsing drops near-duplicate rows from an already sorted result:
//! collapse-to-first keeps the first capture of each run of equal values,
//! collapse-to-last buffers one capture and keeps the final one. A
//! `field:N` spec compares only the first `N` characters, which is mostly
//! used as `timestamp:N` to thin results to one capture per time period.

use once_cell::sync::Lazy;
use regex::Regex;

use cdxhive_core::Capture;

use crate::error::{Error, Result};

static FILTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(~)?(!)?(\w+):(.*)$").unwrap());

/// A single `filter=` expression.
#[derive(Debug, Clone)]
pub struct Filter {
    field: String,
    invert: bool,
    mode: Mode,
}

#[derive(Debug, Clone)]
enum Mode {
    FullMatch(Regex),
    Contains(String),
}

impl Filter {
    pub fn from_spec(spec: &str) -> Result<Filter> {
        let parts = FILTER_RE
            .captures(spec)
            .ok_or_else(|| Error::InvalidQuery(format!("invalid filter: {spec}")))?;
        let substring = parts.get(1).is_some();
        let invert = parts.get(2).is_some();
        let field = parts[3].to_string();
        validate_field(&field)?;
        let mode = if substring {
            Mode::Contains(parts[4].to_string())
        } else {
            let anchored = format!("^(?:{})$", &parts[4]);
            let regex = Regex::new(&anchored)
                .map_err(|err| Error::InvalidQuery(format!("invalid filter regex: {err}")))?;
            Mode::FullMatch(regex)
        };
        Ok(Filter {
            field,
            invert,
            mode,
        })
    }

    pub fn test(&self, capture: &Capture) -> bool {
        let value = field_value(capture, &self.field);
        let matched = match &self.mode {
            Mode::FullMatch(regex) => regex.is_match(&value),
            Mode::Contains(needle) => value.contains(needle.as_str()),
        };
        matched != self.invert
    }
}

/// Keeps the first capture of each run of equal field values.
#[derive(Debug)]
pub struct CollapseToFirst {
    field: String,
    substring_length: Option<usize>,
    last_value: Option<String>,
}

impl CollapseToFirst {
    pub fn from_spec(spec: &str) -> Result<CollapseToFirst> {
        let (field, substring_length) = parse_collapse_spec(spec)?;
        Ok(CollapseToFirst {
            field,
            substring_length,
            last_value: None,
        })
    }

    pub fn test(&mut self, capture: &Capture) -> bool {
        let value = field_value(capture, &self.field);
        let value = truncated(&value, self.substring_length).to_string();
        let changed = self.last_value.as_deref() != Some(value.as_str());
        self.last_value = Some(value);
        changed
    }
}

/// Keeps the last capture of each run of equal field values. Buffers one
/// capture, so rows are emitted once their run is known to have ended.
pub struct CollapseToLast<I> {
    inner: I,
    field: String,
    substring_length: Option<usize>,
    pending: Option<Capture>,
}

impl<I: Iterator<Item = Result<Capture>>> CollapseToLast<I> {
    pub fn new(inner: I, spec: &str) -> Result<CollapseToLast<I>> {
        let (field, substring_length) = parse_collapse_spec(spec)?;
        Ok(CollapseToLast {
            inner,
            field,
            substring_length,
            pending: None,
        })
    }

    fn value_of(&self, capture: &Capture) -> String {
        let value = field_value(capture, &self.field);
        truncated(&value, self.substring_length).to_string()
    }
}

impl<I: Iterator<Item = Result<Capture>>> Iterator for CollapseToLast<I> {
    type Item = Result<Capture>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let incoming = match self.inner.next() {
                Some(Ok(capture)) => Some(capture),
                Some(Err(err)) => return Some(Err(err)),
                None => None,
            };
            match (self.pending.take(), incoming) {
                (None, None) => return None,
                (None, Some(capture)) => self.pending = Some(capture),
                (Some(previous), None) => return Some(Ok(previous)),
                (Some(previous), Some(next)) => {
                    let same_run = self.value_of(&previous) == self.value_of(&next);
                    self.pending = Some(next);
                    if !same_run {
                        return Some(Ok(previous));
                    }
                }
            }
        }
    }
}

fn parse_collapse_spec(spec: &str) -> Result<(String, Option<usize>)> {
    let (field, substring_length) = match spec.split_once(':') {
        Some((field, digits)) => {
            let length = digits.parse().map_err(|_| {
                Error::InvalidQuery(format!("bad collapse substring length: {spec}"))
            })?;
            (field.to_string(), Some(length))
        }
        None => (spec.to_string(), None),
    };
    validate_field(&field)?;
    Ok((field, substring_length))
}

fn validate_field(field: &str) -> Result<()> {
    Capture::default()
        .get(field)
        .map_err(|_| Error::InvalidQuery(format!("no such field: {field}")))?;
    Ok(())
}

fn field_value(capture: &Capture, field: &str) -> String {
    // The field name was validated at construction, so this only comes
    // back empty for genuinely null values.
    capture
        .get_text(field)
        .ok()
        .flatten()
        .unwrap_or_default()
}

fn truncated(value: &str, limit: Option<usize>) -> &str {
    match limit {
        Some(n) if n < value.len() && value.is_char_boundary(n) => &value[..n],
        _ => value,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
