//! URL Canonicalization and SURT Keys
//!
//! This module reduces the many equivalent spellings of a URL to a single
//! canonical form, then converts it to an unschemed SURT (Sort-friendly URI
//! Reordering Transform) string for use as an index key. SURT keys reverse the
//! host segments so captures group by registered domain when sorted bytewise:
//!
//! ```text
//!     http://www.Example.com:80/Path/../Index.HTML?b=2&a=1
//!       canonicalize -> http://example.com/index.html?a=1&b=2
//!       surt         -> com,example)/index.html?a=1&b=2
//! ```
//!
//! ## Canonicalization Steps
//! - tabs and linefeeds stripped, `http://` assumed when no scheme is given
//! - host: collapse doubled dots, IDN to ASCII, lowercase, normalize IP
//!   addresses (including bare decimal/hex/octal forms), strip a leading
//!   `www` (optionally numbered) prefix
//! - default ports dropped, percent escapes decoded to a fixpoint and illegal
//!   bytes re-encoded, paths lowercased and dot-segment normalized, query
//!   fields lowercased and sorted, well-known session id fields removed
//!
//! The splitting rules deliberately mimic `java.net.URL` rather than the
//! WHATWG URL spec, because that is what existing wayback index keys were
//! built with. Unparseable input is passed through unchanged so obviously
//! broken URLs still get a stable (if ugly) key.
//!
//! ## Special Schemes
//! URLs like `youtube-dl:http://example.com/` keep their outer scheme but
//! canonicalize the inner http URL, giving `youtube-dl:com,example)/`. The
//! legacy `urn:transclusions` scheme is folded into `youtube-dl`.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::fuzzy::{self, FuzzyRule};

static WWW_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^www\d*\.").unwrap());
static PATH_SESSIONIDS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"/\([0-9a-z]{24}\)(/[^\?]+.aspx)").unwrap(),
        Regex::new(r";jsessionid=[0-9a-z]{32}()$").unwrap(),
    ]
});
static QUERY_SESSIONID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "^(?:jsessionid=[0-9a-z]{10,}\
         |sessionid=[0-9a-z]{16,}\
         |phpsessid=[0-9a-z]{16,}\
         |sid=[0-9a-z]{16,}\
         |aspsessionid[a-z]{8}=[0-9a-z]{16,})$",
    )
    .unwrap()
});
static CF_SESSIONID: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?:^|&)cfid=[0-9]+&cftoken=[0-9a-z-]+").unwrap());
static UNDOTTED_IP: Lazy<Regex> = Lazy::new(|| Regex::new("^(?:0x)?[0-9]{1,12}$").unwrap());
static DOTTED_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$").unwrap());
static SPECIAL_URL: Lazy<Regex> = Lazy::new(|| Regex::new("(?i)^([^/]+):(https?://.*)").unwrap());

/// The pieces of a URL, split the lenient way `java.net.URL` does it
#[derive(Debug)]
struct SplitUrl {
    scheme: String,
    host: String,
    port: Option<u32>,
    path: String,
    query: Option<String>,
}

impl SplitUrl {
    /// Parse an absolute http or https URL. Leading and trailing whitespace is
    /// trimmed, the fragment is discarded, userinfo is dropped from the
    /// authority and the path and query are kept raw.
    fn parse(raw: &str) -> Option<SplitUrl> {
        let raw = raw.trim_matches(|c: char| c <= ' ');
        let (scheme, rest) = raw.split_once(':')?;
        if !scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
        {
            return None;
        }
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return None;
        }

        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);

        let (host, port, remainder) = if let Some(after) = rest.strip_prefix("//") {
            let end = after.find(['/', '?']).unwrap_or(after.len());
            let (authority, remainder) = after.split_at(end);
            let authority = authority
                .rfind('@')
                .map_or(authority, |i| &authority[i + 1..]);
            let (host, port) = split_port(authority)?;
            (host.to_string(), port, remainder)
        } else {
            (String::new(), None, rest)
        };

        let (path, query) = match remainder.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (remainder.to_string(), None),
        };

        Some(SplitUrl {
            scheme,
            host,
            port,
            path,
            query,
        })
    }
}

impl fmt::Display for SplitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

fn split_port(authority: &str) -> Option<(&str, Option<u32>)> {
    if authority.starts_with('[') {
        // bracketed IPv6 literal
        let close = authority.find(']')?;
        let (host, rest) = authority.split_at(close + 1);
        return match rest.strip_prefix(':') {
            None if rest.is_empty() => Some((host, None)),
            None => None,
            Some("") => Some((host, None)),
            Some(port) => Some((host, Some(port.parse().ok()?))),
        };
    }
    match authority.rfind(':') {
        Some(i) => {
            let port = &authority[i + 1..];
            if port.is_empty() {
                Some((&authority[..i], None))
            } else {
                Some((&authority[..i], Some(port.parse().ok()?)))
            }
        }
        None => Some((authority, None)),
    }
}

fn make_url(raw_url: &str) -> Option<SplitUrl> {
    let raw = raw_url.replace(['\t', '\r', '\n'], "");
    if has_scheme(&raw) {
        SplitUrl::parse(&raw)
    } else {
        SplitUrl::parse(&format!("http://{}", raw))
    }
}

fn has_scheme(url: &str) -> bool {
    match (url.find(':'), url.find('/')) {
        (Some(colon), Some(slash)) => colon < slash,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Canonicalize a URL string. Unparseable input is returned unchanged.
pub fn canonicalize(raw_url: &str) -> String {
    match make_url(raw_url) {
        Some(url) => canonicalize_url(&url).to_string(),
        None => raw_url.to_string(),
    }
}

/// Convert a URL to unschemed SURT form, e.g. `com,example)/index.html`.
/// Dotted-quad IP hosts are kept verbatim instead of being reversed.
pub fn to_unschemed_surt(url: &str) -> String {
    match make_url(url) {
        Some(parsed) => unschemed_surt(&parsed),
        None => url.to_string(),
    }
}

fn unschemed_surt(url: &SplitUrl) -> String {
    let mut result = String::new();
    if DOTTED_IP.is_match(&url.host) {
        result.push_str(&url.host);
    } else {
        let mut segments: Vec<&str> = url.host.split('.').collect();
        segments.reverse();
        result.push_str(&segments.join(","));
        result.push(')');
    }
    if let Some(port) = url.port {
        result.push(':');
        result.push_str(&port.to_string());
    }
    result.push_str(&url.path);
    if let Some(query) = &url.query {
        result.push('?');
        result.push_str(query);
    }
    result
}

fn canonicalize_url(url: &SplitUrl) -> SplitUrl {
    let host = canonicalize_host(&url.host);
    let port = canonicalize_port(&url.scheme, url.port);
    let path = canonicalize_path(&url.path);
    let query = canonicalize_query(url.query.as_deref());
    SplitUrl {
        scheme: url.scheme.clone(),
        host,
        port,
        path,
        query,
    }
}

fn canonicalize_port(scheme: &str, port: Option<u32>) -> Option<u32> {
    match port {
        Some(80) if scheme == "http" => None,
        Some(443) if scheme == "https" => None,
        other => other,
    }
}

fn canonicalize_host(host: &str) -> String {
    let mut host = host.replace("..", ".");
    if host.ends_with('.') {
        host.pop();
    }
    // IDN conversion fails on things like overlong segments; just continue
    // with the raw host in that case.
    if let Ok(ascii) = idna::domain_to_ascii(&host) {
        host = ascii;
    }
    host = host.to_lowercase();
    host = canonicalize_url_encoding(&host);
    host = canonicalize_ip(&host);
    host = WWW_PREFIX.replace(&host, "").into_owned();
    if host.ends_with('.') {
        host.pop();
    }
    host
}

fn canonicalize_path(path: &str) -> String {
    let path = path.to_lowercase();
    let path = canonicalize_url_encoding(&path);
    let mut path = canonicalize_path_segments(&path);
    for sessionid in PATH_SESSIONIDS.iter() {
        path = sessionid.replace(&path, "$1").into_owned();
    }
    path
}

fn canonicalize_path_segments(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        if segment == ".." {
            out.pop();
        } else if !segment.is_empty() && segment != "." {
            out.push(segment);
        }
    }
    format!("/{}", out.join("/"))
}

fn canonicalize_query(query: Option<&str>) -> Option<String> {
    let query = query?.to_lowercase();
    let mut fields: Vec<&str> = query.split('&').collect();
    fields.sort_unstable();
    let filtered: Vec<&str> = fields
        .into_iter()
        .filter(|field| !QUERY_SESSIONID.is_match(field) && !field.is_empty())
        .collect();
    let joined = canonicalize_url_encoding(&filtered.join("&"));
    let stripped = CF_SESSIONID.replace(&joined, "").into_owned();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

fn canonicalize_ip(host: &str) -> String {
    if UNDOTTED_IP.is_match(host) {
        if let Some(x) = decode_numeric_host(host) {
            if x < (1u64 << 32) {
                return format!(
                    "{}.{}.{}.{}",
                    (x >> 24) & 0xff,
                    (x >> 16) & 0xff,
                    (x >> 8) & 0xff,
                    x & 0xff
                );
            }
        }
    }
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<Ipv6Addr>() {
            return format!("[{}]", ip);
        }
    } else if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return ip.to_string();
    }
    host.to_string()
}

/// Numeric host parsing with the historical prefix rules: `0x` means hex and
/// a leading zero means octal.
fn decode_numeric_host(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

fn canonicalize_url_encoding(s: &str) -> String {
    url_encode_illegals(&fully_url_decode(s))
}

fn fully_url_decode(s: &str) -> String {
    let mut prev = s.to_string();
    loop {
        let next = url_decode(&prev);
        if next == prev {
            return prev;
        }
        prev = next;
    }
}

/// One round of percent decoding. Runs of consecutive escapes are decoded as a
/// single byte sequence so multibyte UTF-8 escapes survive; malformed bytes
/// are re-emitted as lowercase escapes and incomplete or invalid escapes are
/// left alone.
fn url_decode(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' {
            let mut bytes = Vec::new();
            while i + 2 < chars.len() && chars[i] == '%' {
                match (chars[i + 1].to_digit(16), chars[i + 2].to_digit(16)) {
                    (Some(hi), Some(lo)) => {
                        bytes.push((hi << 4 | lo) as u8);
                        i += 3;
                    }
                    _ => break,
                }
            }
            try_decode_utf8(&bytes, &mut out);
            if i < chars.len() {
                out.push(chars[i]);
            }
        } else {
            out.push(chars[i]);
        }
        i += 1;
    }
    out
}

fn try_decode_utf8(bytes: &[u8], out: &mut String) {
    let mut rest = bytes;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return;
            }
            Err(e) => {
                let (valid, bad) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                let bad_len = e.error_len().unwrap_or(bad.len());
                for b in &bad[..bad_len] {
                    out.push_str(&format!("%{:02x}", b));
                }
                rest = &bad[bad_len..];
            }
        }
    }
}

fn url_encode_illegals(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'%' || b == b'#' || b <= 0x20 || b >= 0x7f {
            out.push_str(&format!("%{:02x}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Canonicalizes URLs into SURT index keys, optionally applying pywb-style
/// fuzzy canonicalization rules.
#[derive(Debug, Default)]
pub struct UrlCanonicalizer {
    pub(crate) fuzzy_rules: Vec<FuzzyRule>,
}

impl UrlCanonicalizer {
    /// A canonicalizer with no fuzzy rules
    pub fn new() -> UrlCanonicalizer {
        UrlCanonicalizer::default()
    }

    /// Load fuzzy canonicalization rules from a pywb rules.yaml file.
    ///
    /// The file can be copied from pywb verbatim, except that the catch-all
    /// `url_prefix: ''` rule at the end should be removed, as it would force
    /// every url to be pointlessly fuzzy-canonicalized.
    pub fn with_fuzzy_rules(path: impl AsRef<Path>) -> Result<UrlCanonicalizer> {
        let yaml = std::fs::read_to_string(path)?;
        UrlCanonicalizer::from_rules_yaml(&yaml)
    }

    /// Parse fuzzy canonicalization rules from pywb rules.yaml text
    pub fn from_rules_yaml(yaml: &str) -> Result<UrlCanonicalizer> {
        Ok(UrlCanonicalizer {
            fuzzy_rules: fuzzy::load_rules(yaml)?,
        })
    }

    pub fn fuzzy_rule_count(&self) -> usize {
        self.fuzzy_rules.len()
    }

    /// Canonicalizes `url` and returns it in SURT form, for use as a key in
    /// the capture index.
    ///
    /// URLs that look like `{some-scheme}:{http(s)-url}` are handled
    /// specially: the outer scheme is split off, the inner http(s) URL is
    /// canonicalized and surtified, and the scheme is stuck back on. So
    /// `youtube-dl:http://example.com/` becomes `youtube-dl:com,example)/`,
    /// and `urn:transclusions:...` is renamed to `youtube-dl:...` since both
    /// schemes indicate youtube-dl json by convention.
    pub fn surt_canonicalize(&self, url: &str) -> String {
        let surt = match SPECIAL_URL.captures(url) {
            Some(caps) => {
                let mut scheme = caps[1].to_lowercase();
                if scheme == "urn:transclusions" {
                    scheme = "youtube-dl".to_string();
                }
                format!("{}:{}", scheme, to_unschemed_surt(&canonicalize(&caps[2])))
            }
            None => to_unschemed_surt(&canonicalize(url)),
        };

        for rule in &self.fuzzy_rules {
            if let Some(fuzzed) = rule.apply(&surt) {
                return fuzzed;
            }
        }

        surt
    }
}
