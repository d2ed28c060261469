//! CDX query parsing, validation and execution.
//!
//! A [`Query`] is parsed from URL parameters, normalized and then run
//! against an [`Index`]. Normalization happens in a fixed order:
//!
//! 1. compatibility hacks for quirky clients, e.g. `sort=closest` without
//!    a `closest` timestamp falls back to the default sort
//! 2. wildcard expansion, turning `url=foo/*` into a prefix match and
//!    `url=*.example.org` into a domain match
//! 3. validation, rejecting combinations the index cannot serve
//!
//! Execution resolves the queried URL to a urlkey, picks the matching scan
//! and stacks filters, collapsing and the row limit on top, yielding a
//! plain capture iterator for the caller to format.

use std::str::FromStr;

use cdxhive_core::Capture;
use cdxhive_surt::UrlCanonicalizer;

use crate::error::{Error, Result};
use crate::filter::{CollapseToFirst, CollapseToLast, Filter};
use crate::index::{host_from_surt, Index, TIMESTAMP_MAX};

/// Fields reported when no `fl` parameter is given.
pub const DEFAULT_FIELDS: &str =
    "urlkey,timestamp,original,mimetype,statuscode,digest,length,redirecturl,robotflags,offset,filename";

/// Default fields in CDX14 mode, which adds the original record location
/// for revisit records.
pub const DEFAULT_FIELDS_CDX14: &str = "urlkey,timestamp,original,mimetype,statuscode,digest,length,redirecturl,robotflags,offset,filename,originalLength,originalOffset,originalFilename";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Default,
    Exact,
    Prefix,
    Host,
    Domain,
    Range,
}

impl FromStr for MatchType {
    type Err = Error;

    fn from_str(text: &str) -> Result<MatchType> {
        match text.to_ascii_lowercase().as_str() {
            "default" => Ok(MatchType::Default),
            "exact" => Ok(MatchType::Exact),
            "prefix" => Ok(MatchType::Prefix),
            "host" => Ok(MatchType::Host),
            "domain" => Ok(MatchType::Domain),
            "range" => Ok(MatchType::Range),
            _ => Err(Error::InvalidQuery(format!("invalid matchType: {text}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Default,
    Closest,
    Reverse,
}

impl FromStr for Sort {
    type Err = Error;

    fn from_str(text: &str) -> Result<Sort> {
        match text.to_ascii_lowercase().as_str() {
            "default" => Ok(Sort::Default),
            "closest" => Ok(Sort::Closest),
            "reverse" => Ok(Sort::Reverse),
            _ => Err(Error::InvalidQuery(format!("invalid sort: {text}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    JsonDict,
    Cdxj,
}

/// A parsed CDX query.
#[derive(Debug)]
pub struct Query {
    pub access_point: Option<String>,
    pub url: Option<String>,
    pub urlkey: Option<String>,
    pub match_type: MatchType,
    pub sort: Sort,
    pub closest: Option<String>,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub range_end: Option<String>,
    pub filters: Vec<Filter>,
    pub collapse_to_first: Option<String>,
    pub collapse_to_last: Option<String>,
    pub fields: Vec<String>,
    /// False when `fl` explicitly restricted the field list.
    pub all_fields: bool,
    pub limit: u64,
    pub output: OutputFormat,
}

impl Query {
    /// Parses a query from URL parameters. Repeated `filter` parameters
    /// accumulate; unknown parameters are ignored.
    pub fn from_params(params: &[(String, String)], cdx14: bool) -> Result<Query> {
        let mut query = Query {
            access_point: None,
            url: None,
            urlkey: None,
            match_type: MatchType::Default,
            sort: Sort::Default,
            closest: None,
            from: None,
            to: None,
            range_end: None,
            filters: Vec::new(),
            collapse_to_first: None,
            collapse_to_last: None,
            fields: Vec::new(),
            all_fields: true,
            limit: u64::MAX,
            output: OutputFormat::Text,
        };
        for (name, value) in params {
            match name.as_str() {
                "accesspoint" => query.access_point = Some(value.clone()),
                "url" => query.url = Some(value.clone()),
                "urlkey" => query.urlkey = Some(value.clone()),
                "matchType" => query.match_type = value.parse()?,
                "sort" => query.sort = value.parse()?,
                "closest" => query.closest = Some(value.clone()),
                "from" => query.from = Some(pad_timestamp(value, '0')?),
                "to" => query.to = Some(pad_timestamp(value, '9')?),
                "rangeEnd" => query.range_end = Some(value.clone()),
                "filter" => query.filters.push(Filter::from_spec(value)?),
                "collapse" | "collapseToFirst" => {
                    query.collapse_to_first = Some(value.clone());
                    CollapseToFirst::from_spec(value)?;
                }
                "collapseToLast" => {
                    query.collapse_to_last = Some(value.clone());
                    CollapseToFirst::from_spec(value)?;
                }
                "fl" => {
                    query.fields = value.split(',').map(str::to_string).collect();
                    query.all_fields = false;
                    for field in &query.fields {
                        Capture::default().get(field).map_err(|_| {
                            Error::InvalidQuery(format!("no such field: {field}"))
                        })?;
                    }
                }
                "limit" => {
                    query.limit = value
                        .parse()
                        .map_err(|_| Error::InvalidQuery(format!("invalid limit: {value}")))?;
                }
                "output" => {
                    query.output = match value.as_str() {
                        "json" => OutputFormat::Json,
                        "jsondict" => OutputFormat::JsonDict,
                        "cdxj" => OutputFormat::Cdxj,
                        _ => OutputFormat::Text,
                    };
                }
                _ => {}
            }
        }
        if query.fields.is_empty() {
            let defaults = if cdx14 { DEFAULT_FIELDS_CDX14 } else { DEFAULT_FIELDS };
            query.fields = defaults.split(',').map(str::to_string).collect();
        }
        Ok(query)
    }

    /// Some clients send `sort=closest` without a closest timestamp when
    /// they really want a plain query.
    fn compatibility_hacks(&mut self) {
        if self.sort == Sort::Closest && self.closest.as_deref().unwrap_or("").is_empty() {
            self.sort = Sort::Default;
        }
    }

    /// Rewrites wildcard URLs into the matching query type. Only applies
    /// when no explicit matchType was given.
    fn expand_wildcards(&mut self) {
        if self.match_type != MatchType::Default {
            return;
        }
        if let Some(url) = &self.url {
            if let Some(stripped) = url.strip_suffix('*') {
                self.match_type = MatchType::Prefix;
                self.url = Some(stripped.to_string());
                return;
            }
            if let Some(stripped) = url.strip_prefix("*.") {
                self.match_type = MatchType::Domain;
                self.url = Some(stripped.to_string());
                return;
            }
        }
        self.match_type = MatchType::Exact;
    }

    fn validate(&self) -> Result<()> {
        match (&self.url, &self.urlkey) {
            (None, None) => {
                return Err(Error::InvalidQuery(
                    "url or urlkey parameter is required".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidQuery(
                    "specify either url or urlkey, not both".to_string(),
                ))
            }
            _ => {}
        }
        if self.sort == Sort::Closest {
            if self.match_type != MatchType::Exact {
                return Err(Error::InvalidQuery(
                    "sort=closest is currently only implemented for exact matches".to_string(),
                ));
            }
            if self.closest.is_none() {
                return Err(Error::InvalidQuery(
                    "closest={timestamp} is mandatory when using sort=closest".to_string(),
                ));
            }
        }
        if self.sort == Sort::Reverse && self.match_type != MatchType::Exact {
            return Err(Error::InvalidQuery(
                "sort=reverse is currently only implemented for exact matches".to_string(),
            ));
        }
        if (self.from.is_some() || self.to.is_some()) && self.match_type != MatchType::Exact {
            return Err(Error::InvalidQuery(
                "from and to are currently only implemented for exact matches".to_string(),
            ));
        }
        Ok(())
    }

    /// Normalizes, validates and runs the query, returning captures in
    /// result order with filters, collapsing and the row limit applied.
    /// After this returns, [`Query::urlkey`] holds the resolved key.
    pub fn execute<'i>(
        &mut self,
        index: &'i Index,
        canonicalizer: &UrlCanonicalizer,
    ) -> Result<Box<dyn Iterator<Item = Result<Capture>> + 'i>> {
        self.compatibility_hacks();
        self.expand_wildcards();
        self.validate()?;

        let key = match (&self.urlkey, &self.url) {
            (Some(key), _) => key.clone(),
            (None, Some(url)) => canonicalizer.surt_canonicalize(url),
            (None, None) => {
                return Err(Error::InvalidQuery(
                    "url or urlkey parameter is required".to_string(),
                ))
            }
        };
        self.urlkey = Some(key.clone());

        let access_point = self.access_point.as_deref();
        let from = self.from.unwrap_or(0);
        let to = self.to.unwrap_or(TIMESTAMP_MAX);

        let mut stream: Box<dyn Iterator<Item = Result<Capture>> + 'i> = match self.match_type {
            MatchType::Default | MatchType::Exact => match self.sort {
                Sort::Default => Box::new(index.query(&key, from, to, access_point)?),
                Sort::Reverse => Box::new(index.reverse_query(&key, from, to, access_point)?),
                Sort::Closest => {
                    let target = self.closest_timestamp()?;
                    Box::new(index.closest_query(&key, target, access_point)?)
                }
            },
            MatchType::Prefix => Box::new(index.prefix_query(&key, access_point)?),
            MatchType::Host => {
                let prefix = format!("{})/", host_from_surt(&key));
                Box::new(index.prefix_query(&prefix, access_point)?)
            }
            MatchType::Domain => {
                Box::new(index.domain_query(host_from_surt(&key), access_point)?)
            }
            MatchType::Range => {
                Box::new(index.range_query(&key, self.range_end.as_deref(), access_point)?)
            }
        };

        if !self.filters.is_empty() {
            let filters = self.filters.clone();
            stream = Box::new(stream.filter(move |item| match item {
                Ok(capture) => filters.iter().all(|filter| filter.test(capture)),
                Err(_) => true,
            }));
        }
        if let Some(spec) = &self.collapse_to_first {
            let mut collapser = CollapseToFirst::from_spec(spec)?;
            stream = Box::new(stream.filter(move |item| match item {
                Ok(capture) => collapser.test(capture),
                Err(_) => true,
            }));
        }
        if let Some(spec) = &self.collapse_to_last {
            stream = Box::new(CollapseToLast::new(stream, spec)?);
        }
        if self.limit < u64::MAX {
            stream = Box::new(stream.take(self.limit.min(usize::MAX as u64) as usize));
        }
        Ok(stream)
    }

    fn closest_timestamp(&self) -> Result<u64> {
        let text = self
            .closest
            .as_deref()
            .ok_or_else(|| Error::InvalidQuery("closest timestamp is missing".to_string()))?;
        text.parse()
            .map_err(|_| Error::InvalidQuery(format!("bad closest timestamp: {text}")))
    }
}

fn pad_timestamp(text: &str, fill: char) -> Result<u64> {
    if text.is_empty() || text.len() > 14 || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidQuery(format!("bad timestamp: {text}")));
    }
    let mut padded = text.to_string();
    while padded.len() < 14 {
        padded.push(fill);
    }
    padded
        .parse()
        .map_err(|_| Error::InvalidQuery(format!("bad timestamp: {text}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataStore, StoreConfig};
    use tempfile::TempDir;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(pairs: &[(&str, &str)]) -> Query {
        Query::from_params(&params(pairs), false).unwrap()
    }

    // ------------------------------------------------------------------
    // Parsing and normalization
    // ------------------------------------------------------------------

    #[test]
    fn trailing_star_expands_to_a_prefix_match() {
        let mut query = parse(&[("url", "http://example.org/*")]);
        query.expand_wildcards();
        assert_eq!(query.match_type, MatchType::Prefix);
        assert_eq!(query.url.as_deref(), Some("http://example.org/"));
    }

    #[test]
    fn leading_star_dot_expands_to_a_domain_match() {
        let mut query = parse(&[("url", "*.example.org")]);
        query.expand_wildcards();
        assert_eq!(query.match_type, MatchType::Domain);
        assert_eq!(query.url.as_deref(), Some("example.org"));
    }

    #[test]
    fn explicit_match_type_disables_wildcard_expansion() {
        let mut query = parse(&[("url", "http://example.org/*"), ("matchType", "exact")]);
        query.expand_wildcards();
        assert_eq!(query.match_type, MatchType::Exact);
        assert_eq!(query.url.as_deref(), Some("http://example.org/*"));
    }

    #[test]
    fn closest_sort_without_timestamp_falls_back_to_default() {
        let mut query = parse(&[("url", "http://example.org/"), ("sort", "closest")]);
        query.compatibility_hacks();
        assert_eq!(query.sort, Sort::Default);

        let mut with_empty = parse(&[
            ("url", "http://example.org/"),
            ("sort", "closest"),
            ("closest", ""),
        ]);
        with_empty.compatibility_hacks();
        assert_eq!(with_empty.sort, Sort::Default);
    }

    #[test]
    fn from_and_to_are_padded_to_14_digits() {
        let query = parse(&[
            ("url", "http://example.org/"),
            ("from", "2006"),
            ("to", "2006"),
        ]);
        assert_eq!(query.from, Some(20060000000000));
        assert_eq!(query.to, Some(20069999999999));
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let bad = |pairs: &[(&str, &str)]| Query::from_params(&params(pairs), false);
        assert!(matches!(
            bad(&[("url", "x"), ("matchType", "sideways")]),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            bad(&[("url", "x"), ("from", "20o6")]),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            bad(&[("url", "x"), ("limit", "many")]),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            bad(&[("url", "x"), ("fl", "urlkey,bogus")]),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            bad(&[("url", "x"), ("filter", "nonsense")]),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            bad(&[("url", "x"), ("collapse", "bogus")]),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn default_field_lists_follow_the_cdx14_flag() {
        let query = Query::from_params(&params(&[("url", "x")]), false).unwrap();
        assert_eq!(query.fields.len(), 11);
        let cdx14 = Query::from_params(&params(&[("url", "x")]), true).unwrap();
        assert_eq!(cdx14.fields.len(), 14);
        assert_eq!(cdx14.fields.last().map(String::as_str), Some("originalFilename"));
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn run_validation(pairs: &[(&str, &str)]) -> Result<()> {
        let mut query = parse(pairs);
        query.compatibility_hacks();
        query.expand_wildcards();
        query.validate()
    }

    fn error_message(result: Result<()>) -> String {
        match result {
            Err(err) => err.to_string(),
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn closest_sort_requires_an_exact_match() {
        let message = error_message(run_validation(&[
            ("url", "http://example.org/*"),
            ("sort", "closest"),
            ("closest", "20060101000000"),
        ]));
        assert!(message.contains("sort=closest is currently only implemented for exact matches"));
    }

    #[test]
    fn reverse_sort_requires_an_exact_match() {
        let message = error_message(run_validation(&[
            ("url", "*.example.org"),
            ("sort", "reverse"),
        ]));
        assert!(message.contains("sort=reverse is currently only implemented for exact matches"));
    }

    #[test]
    fn time_bounds_require_an_exact_match() {
        let message = error_message(run_validation(&[
            ("url", "http://example.org/*"),
            ("from", "2006"),
        ]));
        assert!(message.contains("from and to are currently only implemented for exact matches"));
    }

    #[test]
    fn url_and_urlkey_are_mutually_exclusive_and_mandatory() {
        assert!(run_validation(&[]).is_err());
        assert!(run_validation(&[
            ("url", "http://example.org/"),
            ("urlkey", "org,example)/"),
        ])
        .is_err());
        assert!(run_validation(&[("urlkey", "org,example)/")]).is_ok());
    }

    // ------------------------------------------------------------------
    // Execution against an index
    // ------------------------------------------------------------------

    fn seeded_index() -> (TempDir, std::sync::Arc<Index>) {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path(), StoreConfig::default()).unwrap();
        let index = store.index("query", true).unwrap().unwrap();
        let canonicalizer = UrlCanonicalizer::new();
        let lines = [
            "- 20050614070159 http://nla.gov.au/ text/html 200 - - 337023 crawl0",
            "- 20060914155000 http://nla.gov.au/ text/html 200 - - 444444 crawl1",
            "- 20060914155000 http://nla.gov.au/about text/html 404 - - 100 crawl1",
            "- 20070101000000 http://nla.gov.au/about text/html 200 - - 200 crawl2",
            "- 20050614070159 http://pandora.nla.gov.au/ text/html 200 - - 1 crawl0",
        ];
        let mut batch = index.batch();
        for line in lines {
            batch
                .put_capture(Capture::from_cdx_line(line, &canonicalizer).unwrap())
                .unwrap();
        }
        batch.commit().unwrap();
        (dir, index)
    }

    fn run(index: &Index, pairs: &[(&str, &str)]) -> Vec<Capture> {
        let canonicalizer = UrlCanonicalizer::new();
        let mut query = Query::from_params(&params(pairs), false).unwrap();
        query
            .execute(index, &canonicalizer)
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
    }

    #[test]
    fn exact_query_returns_captures_in_timestamp_order() {
        let (_dir, index) = seeded_index();
        let results = run(&index, &[("url", "nla.gov.au")]);
        assert_eq!(
            results.iter().map(|c| c.timestamp).collect::<Vec<_>>(),
            vec![20050614070159, 20060914155000]
        );
        assert!(results.iter().all(|c| c.urlkey == "au,gov,nla)/"));
    }

    #[test]
    fn closest_query_puts_the_nearest_capture_first() {
        let (_dir, index) = seeded_index();
        let results = run(
            &index,
            &[
                ("url", "nla.gov.au"),
                ("sort", "closest"),
                ("closest", "20060101000000"),
            ],
        );
        assert_eq!(
            results.iter().map(|c| c.timestamp).collect::<Vec<_>>(),
            vec![20050614070159, 20060914155000]
        );
    }

    #[test]
    fn wildcard_query_spans_a_whole_domain() {
        let (_dir, index) = seeded_index();
        let results = run(&index, &[("url", "*.nla.gov.au")]);
        let keys: Vec<&str> = results.iter().map(|c| c.urlkey.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "au,gov,nla)/",
                "au,gov,nla)/",
                "au,gov,nla)/about",
                "au,gov,nla)/about",
                "au,gov,nla,pandora)/",
            ]
        );
    }

    #[test]
    fn filters_and_limits_compose() {
        let (_dir, index) = seeded_index();
        let ok_only = run(
            &index,
            &[("url", "nla.gov.au/*"), ("filter", "statuscode:200")],
        );
        assert_eq!(ok_only.len(), 3);

        let limited = run(&index, &[("url", "nla.gov.au/*"), ("limit", "2")]);
        assert_eq!(limited.len(), 2);

        let collapsed = run(
            &index,
            &[("url", "nla.gov.au/*"), ("collapse", "urlkey")],
        );
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn urlkey_queries_bypass_canonicalization() {
        let (_dir, index) = seeded_index();
        let results = run(&index, &[("urlkey", "au,gov,nla)/about")]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn resolved_urlkey_is_recorded_on_the_query() {
        let (_dir, index) = seeded_index();
        let canonicalizer = UrlCanonicalizer::new();
        let mut query = parse(&[("url", "http://www.nla.gov.au:80/about")]);
        query.execute(&index, &canonicalizer).unwrap().count();
        assert_eq!(query.urlkey.as_deref(), Some("au,gov,nla)/about"));
    }
}
