//! CDX Line Parsing
//!
//! Parses the textual CDX formats produced by crawl indexing tools into
//! [`Capture`] records. Two families of input line are accepted:
//!
//! - classic space-separated CDX lines with 9, 10, 11 or 14 fields
//!   (`urlkey timestamp url mimetype status digest redirect [robotflags]
//!   [length] offset filename ...`)
//! - CDXJ lines where the third field onward is a JSON object
//!   (`urlkey timestamp {"url": ..., "status": ...}`)
//!
//! The urlkey field of the incoming line is never trusted: keys are always
//! regenerated with our own canonicalizer so the index stays consistent no
//! matter which tool produced the line. The only thing the old urlkey is used
//! for is recovering the request method and body of POST/PUT captures
//! indexed by cdxj-indexer's `--post-append` mode, which encodes them as
//! extra query parameters in the key.

use serde_json::Value;
use tracing::warn;

use crate::capture::{Capture, PAD_TIMESTAMP};
use crate::error::{Error, Result};

use cdxhive_surt::UrlCanonicalizer;

impl Capture {
    /// Parses a CDX or CDXJ line. The line's own urlkey is ignored and
    /// regenerated from the url field.
    pub fn from_cdx_line(line: &str, canonicalizer: &UrlCanonicalizer) -> Result<Capture> {
        let line = line.trim_end();
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() > 2 && fields[2].starts_with('{') {
            return Capture::from_cdxj_line(line, canonicalizer);
        }
        if fields.len() < 9 {
            return Err(Error::InvalidCdxLine(line.to_string()));
        }

        let mut capture = Capture::default();
        capture.timestamp = parse_cdx_timestamp(fields[1])?;
        capture.original = fields[2].to_string();
        capture.infer_method_and_request_body(fields[0], canonicalizer)?;
        capture.urlkey = capture.generate_url_key(canonicalizer);
        capture.mimetype = fields[3].to_string();
        capture.status = if fields[4] == "-" {
            0
        } else {
            parse_number(fields[4], line)?
        };
        capture.digest = strip_digest_scheme(fields[5]);
        capture.redirecturl = fields[6].to_string();

        if fields.len() >= 11 {
            // 11 fields: CDX N b a m s k r M S V g
            capture.robotflags = fields[7].to_string();
            capture.length = if fields[8] == "-" {
                -1
            } else {
                parse_number(fields[8], line)?
            };
            capture.compressed_offset = parse_number(fields[9], line)?;
            capture.file = fields[10].to_string();

            if fields.len() == 14 {
                capture.original_length = if fields[11] == "-" {
                    0
                } else {
                    parse_number(fields[11], line)?
                };
                capture.original_compressed_offset = if fields[12] == "-" {
                    0
                } else {
                    parse_number(fields[12], line)?
                };
                capture.original_file = fields[13].to_string();
            }
        } else if fields.len() == 10 {
            // 10 fields: CDX N b a m s k r M V g
            capture.robotflags = fields[7].to_string();
            capture.compressed_offset = parse_number(fields[8], line)?;
            capture.file = fields[9].to_string();
        } else {
            // 9 fields: CDX N b a m s k r V g
            capture.robotflags = "-".to_string();
            capture.compressed_offset = parse_number(fields[7], line)?;
            capture.file = fields[8].to_string();
        }

        Ok(capture)
    }

    fn from_cdxj_line(line: &str, canonicalizer: &UrlCanonicalizer) -> Result<Capture> {
        let mut parts = line.splitn(3, ' ');
        let (old_urlkey, timestamp, json_text) = match (parts.next(), parts.next(), parts.next()) {
            (Some(urlkey), Some(timestamp), Some(json)) => (urlkey, timestamp, json),
            _ => return Err(Error::InvalidCdxLine(line.to_string())),
        };

        let mut capture = Capture::default();
        capture.timestamp = parse_cdx_timestamp(timestamp)?;
        let json: serde_json::Map<String, Value> = serde_json::from_str(json_text)
            .map_err(|_| Error::InvalidCdxLine(line.to_string()))?;
        for (field, value) in json {
            capture.put(&field, value)?;
        }
        if capture.original == "-" {
            // every capture needs a url to generate its key from
            return Err(Error::InvalidCdxLine(line.to_string()));
        }
        capture.infer_method_and_request_body(old_urlkey, canonicalizer)?;
        capture.urlkey = capture.generate_url_key(canonicalizer);
        Ok(capture)
    }

    fn extra_str(&self, field: &str) -> Option<&str> {
        match self.extra.get(field) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Attempts to recover the `method` and `requestBody` extra fields from an
    /// old urlkey produced by cdxj-indexer's `--post-append` mode.
    ///
    /// That mode bakes the request method and an encoded form of the request
    /// body into the urlkey as extra query parameters. In CDXJ output it
    /// usually also emits `method` and `requestBody` fields, but CDX11 output
    /// and older cdxj-indexer versions don't, so the only place the values
    /// survive is the key itself. Any query parameter present in the old key
    /// but absent from the url must be one of these additions.
    ///
    /// Does nothing if the extra fields are already populated.
    fn infer_method_and_request_body(
        &mut self,
        old_urlkey: &str,
        canonicalizer: &UrlCanonicalizer,
    ) -> Result<()> {
        if !old_urlkey.contains("__wb_method=") {
            return Ok(());
        }
        if self.extra.contains_key("method") || self.extra.contains_key("requestBody") {
            return Ok(());
        }

        let old_params = extract_query_params(old_urlkey);
        let new_urlkey = canonicalizer.surt_canonicalize(&self.original);
        let new_params = extract_query_params(&new_urlkey);
        let mut body = String::new();
        for param in diff_params(&old_params, &new_params) {
            if let Some(method) = param.strip_prefix("__wb_method=") {
                self.put("method", Value::String(method.to_uppercase()))?;
            } else {
                // probably a request body parameter
                if !body.is_empty() {
                    body.push('&');
                }
                body.push_str(param);
            }
        }
        if !body.is_empty() {
            self.put("requestBody", Value::String(body))?;
        }
        Ok(())
    }

    /// Generates the canonical urlkey for this capture. POST and PUT requests
    /// get the method and request body appended as query parameters so
    /// distinct submissions to the same url index separately.
    pub fn generate_url_key(&self, canonicalizer: &UrlCanonicalizer) -> String {
        let method = self.extra_str("method");
        let url = match method {
            Some(m) if m.eq_ignore_ascii_case("POST") || m.eq_ignore_ascii_case("PUT") => {
                let mut url = self.original.clone();
                url.push(if self.original.contains('?') { '&' } else { '?' });
                url.push_str("__wb_method=");
                url.push_str(m);
                match self.extra_str("requestBody") {
                    Some(body) if !body.is_empty() => {
                        url.push('&');
                        url.push_str(body);
                    }
                    _ => {}
                }
                url
            }
            _ => self.original.clone(),
        };
        canonicalizer.surt_canonicalize(&url)
    }

    /// True if this capture is a redirect pointing back at its own url
    pub fn is_self_redirect(&self, canonicalizer: &UrlCanonicalizer) -> bool {
        if !(300..400).contains(&self.status) {
            return false;
        }
        if self.redirecturl == self.original {
            return true;
        }
        self.urlkey == canonicalizer.surt_canonicalize(&self.redirecturl)
    }
}

/// Converts a CDX timestamp to a number. Timestamps shorter than the full 14
/// digits are right-padded with zeros; longer ones are rejected.
fn parse_cdx_timestamp(timestamp: &str) -> Result<u64> {
    let padded = if timestamp.len() < 14 {
        warn!("padding timestamp shorter than 14 chars: {}", timestamp);
        format!("{}{}", timestamp, &PAD_TIMESTAMP[timestamp.len()..])
    } else if timestamp.len() > 14 {
        return Err(Error::InvalidTimestamp(timestamp.to_string()));
    } else {
        timestamp.to_string()
    };
    padded
        .parse()
        .map_err(|_| Error::InvalidTimestamp(timestamp.to_string()))
}

fn parse_number<T: std::str::FromStr>(text: &str, line: &str) -> Result<T> {
    text.parse()
        .map_err(|_| Error::InvalidCdxLine(line.to_string()))
}

/// Removes a leading digest algorithm prefix, so `sha1:XYZ` becomes `XYZ`
fn strip_digest_scheme(digest: &str) -> String {
    if digest.contains(':') {
        digest.split(':').nth(1).unwrap_or("").to_string()
    } else {
        digest.to_string()
    }
}

fn extract_query_params(url: &str) -> Vec<&str> {
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => return Vec::new(),
    };
    let mut params: Vec<&str> = query.split('&').collect();
    while params.last() == Some(&"") {
        params.pop();
    }
    params
}

/// Returns the strings in `a` but not in `b`. Both slices must be sorted.
fn diff_params<'a>(a: &[&'a str], b: &[&str]) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(b[j]) {
            std::cmp::Ordering::Less => {
                result.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    result.extend_from_slice(&a[i..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon() -> UrlCanonicalizer {
        UrlCanonicalizer::new()
    }

    // ---------------------------------------------------------------------
    // classic CDX lines
    // ---------------------------------------------------------------------

    #[test]
    fn test_parse_cdx9_line() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://www.archive.org/ text/html 200 XAHDNHZ5P3GSSSNJ3DMEOJXS5FRladQ8 - 49 robots.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.urlkey, "org,archive)/");
        assert_eq!(capture.timestamp, 20050614070159);
        assert_eq!(capture.original, "http://www.archive.org/");
        assert_eq!(capture.mimetype, "text/html");
        assert_eq!(capture.status, 200);
        assert_eq!(capture.digest, "XAHDNHZ5P3GSSSNJ3DMEOJXS5FRladQ8");
        assert_eq!(capture.redirecturl, "-");
        assert_eq!(capture.robotflags, "-");
        assert_eq!(capture.length, -1);
        assert_eq!(capture.compressed_offset, 49);
        assert_eq!(capture.file, "robots.warc.gz");
    }

    #[test]
    fn test_parse_cdx10_line() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html 200 SHA SOMEWHERE A 49 robots.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.robotflags, "A");
        assert_eq!(capture.compressed_offset, 49);
        assert_eq!(capture.file, "robots.warc.gz");
        assert_eq!(capture.length, -1);
    }

    #[test]
    fn test_parse_cdx11_line() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html 200 SHA SOMEWHERE A 1234 49 robots.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.robotflags, "A");
        assert_eq!(capture.length, 1234);
        assert_eq!(capture.compressed_offset, 49);
        assert_eq!(capture.file, "robots.warc.gz");
    }

    #[test]
    fn test_parse_cdx14_line() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html 200 SHA SOMEWHERE A 1234 49 robots.warc.gz 2345 67 original.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.length, 1234);
        assert_eq!(capture.compressed_offset, 49);
        assert_eq!(capture.file, "robots.warc.gz");
        assert_eq!(capture.original_length, 2345);
        assert_eq!(capture.original_compressed_offset, 67);
        assert_eq!(capture.original_file, "original.warc.gz");
    }

    #[test]
    fn test_cdx14_dashes_mean_zero() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html 200 SHA - A - 49 robots.warc.gz - - -",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.length, -1);
        assert_eq!(capture.original_length, 0);
        assert_eq!(capture.original_compressed_offset, 0);
        assert_eq!(capture.original_file, "-");
    }

    #[test]
    fn test_status_dash_is_zero() {
        let capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ warc/revisit - SHA - 49 robots.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.status, 0);
    }

    #[test]
    fn test_digest_scheme_is_stripped() {
        let capture = Capture::from_cdx_line(
            "- 19870102030405 http://example.org/ text/html 200 sha1:M5ORM4XQ5QCEZEDRNZRGSWXPCOGUVASI - 100 test.warc.gz",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.digest, "M5ORM4XQ5QCEZEDRNZRGSWXPCOGUVASI");
    }

    #[test]
    fn test_urlkey_is_regenerated() {
        let capture = Capture::from_cdx_line(
            "completely-bogus-urlkey 20050614070159 http://www.example.org/x?b=2&a=1 text/html 200 SHA - 49 w1",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.urlkey, "org,example)/x?a=1&b=2");
    }

    #[test]
    fn test_too_few_fields_is_an_error() {
        let err = Capture::from_cdx_line("- 20050614070159 http://example.org/", &canon());
        assert!(err.is_err());
    }

    #[test]
    fn test_garbage_number_is_an_error() {
        let err = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html twohundred SHA - 49 w1",
            &canon(),
        );
        assert!(matches!(err, Err(Error::InvalidCdxLine(_))));
    }

    // ---------------------------------------------------------------------
    // timestamps
    // ---------------------------------------------------------------------

    #[test]
    fn test_short_timestamp_is_zero_padded() {
        assert_eq!(parse_cdx_timestamp("2005").unwrap(), 20050000000000);
        assert_eq!(parse_cdx_timestamp("20050614070159").unwrap(), 20050614070159);
    }

    #[test]
    fn test_long_timestamp_is_an_error() {
        assert!(matches!(
            parse_cdx_timestamp("200506140701590"),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_non_numeric_timestamp_is_an_error() {
        assert!(matches!(
            parse_cdx_timestamp("2005061407015x"),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    // ---------------------------------------------------------------------
    // CDXJ lines
    // ---------------------------------------------------------------------

    #[test]
    fn test_parse_cdxj_line() {
        let capture = Capture::from_cdxj_line(
            "org,example)/thing 20210203115119 {\"url\": \"https://example.org/thing\", \
             \"mime\": \"text/html\", \"status\": \"200\", \"digest\": \"MMM\", \
             \"length\": \"500\", \"offset\": \"1234\", \"filename\": \"test.warc.gz\", \
             \"sand\": \"wich\"}",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.urlkey, "org,example)/thing");
        assert_eq!(capture.timestamp, 20210203115119);
        assert_eq!(capture.original, "https://example.org/thing");
        assert_eq!(capture.mimetype, "text/html");
        assert_eq!(capture.status, 200);
        assert_eq!(capture.digest, "MMM");
        assert_eq!(capture.length, 500);
        assert_eq!(capture.compressed_offset, 1234);
        assert_eq!(capture.file, "test.warc.gz");
        assert_eq!(
            capture.get("sand").unwrap(),
            Value::String("wich".to_string())
        );
    }

    #[test]
    fn test_cdxj_line_without_url_is_an_error() {
        let err = Capture::from_cdx_line(
            "org,example)/ 20210203115119 {\"status\": \"200\"}",
            &canon(),
        );
        assert!(matches!(err, Err(Error::InvalidCdxLine(_))));
    }

    #[test]
    fn test_cdxj_line_with_bad_json_is_an_error() {
        let err = Capture::from_cdx_line("org,example)/ 20210203115119 {oops", &canon());
        assert!(matches!(err, Err(Error::InvalidCdxLine(_))));
    }

    // ---------------------------------------------------------------------
    // POST/PUT method and request body inference
    // ---------------------------------------------------------------------

    #[test]
    fn test_post_data_is_recovered_from_old_urlkey() {
        let capture = Capture::from_cdx_line(
            "org,post)/?__wb_method=post&__wb_post_data=dGVzdAo= 20200528143307 http://post.org/ text/html 200 - - 0 w1",
            &canon(),
        )
        .unwrap();
        assert_eq!(
            capture.get("method").unwrap(),
            Value::String("POST".to_string())
        );
        assert_eq!(
            capture.get("requestBody").unwrap(),
            Value::String("__wb_post_data=dGVzdAo=".to_string())
        );
        assert_eq!(
            capture.urlkey,
            "org,post)/?__wb_method=post&__wb_post_data=dgvzdao="
        );
    }

    #[test]
    fn test_explicit_method_fields_win_over_inference() {
        let capture = Capture::from_cdx_line(
            "org,post)/?__wb_method=post&ignored=1 20200528143307 {\"url\": \"http://post.org/\", \
             \"method\": \"POST\", \"requestBody\": \"a=b\", \"filename\": \"w1\", \"offset\": \"0\"}",
            &canon(),
        )
        .unwrap();
        assert_eq!(
            capture.get("requestBody").unwrap(),
            Value::String("a=b".to_string())
        );
        assert_eq!(capture.urlkey, "org,post)/?__wb_method=post&a=b");
    }

    #[test]
    fn test_get_request_key_has_no_method_parameter() {
        let capture = Capture::from_cdx_line(
            "- 20200528143307 http://example.org/?q=1 text/html 200 - - 0 w1",
            &canon(),
        )
        .unwrap();
        assert_eq!(capture.urlkey, "org,example)/?q=1");
    }

    #[test]
    fn test_diff_params() {
        assert_eq!(
            diff_params(&["a=1", "b=2", "c=3"], &["b=2"]),
            vec!["a=1", "c=3"]
        );
        assert_eq!(diff_params(&["a=1"], &[]), vec!["a=1"]);
        assert!(diff_params(&["a=1"], &["a=1"]).is_empty());
    }

    #[test]
    fn test_extract_query_params_drops_trailing_empties() {
        assert_eq!(extract_query_params("http://x/?a=1&b=2&"), vec!["a=1", "b=2"]);
        assert!(extract_query_params("http://x/").is_empty());
    }

    // ---------------------------------------------------------------------
    // self redirects
    // ---------------------------------------------------------------------

    #[test]
    fn test_self_redirect_detection() {
        let canonicalizer = canon();
        let mut capture = Capture::from_cdx_line(
            "- 20050614070159 http://example.org/ text/html 301 SHA http://example.org/ - 49 w1",
            &canonicalizer,
        )
        .unwrap();
        assert!(capture.is_self_redirect(&canonicalizer));

        // same key after canonicalization still counts
        capture.redirecturl = "http://EXAMPLE.org/".to_string();
        assert!(capture.is_self_redirect(&canonicalizer));

        capture.redirecturl = "http://example.org/elsewhere".to_string();
        assert!(!capture.is_self_redirect(&canonicalizer));

        // not a redirect status
        capture.status = 200;
        capture.redirecturl = capture.original.clone();
        assert!(!capture.is_self_redirect(&canonicalizer));
    }
}
