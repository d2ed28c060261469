//! CDX query response rendering.
//!
//! Four formats, selected by the `output` query parameter:
//!
//! * `cdx` (default): space separated text, one capture per line, null
//!   fields as `-`
//! * `json`: a compact array of arrays, with the field names as the first
//!   row and nulls preserved
//! * `jsondict`: an array of objects, omitting null and `-` fields
//! * `cdxj`: pywb's native format, `urlkey timestamp {json}` per line

use cdxhive_core::Capture;
use cdxhive_index::{OutputFormat, Query, Result};
use serde_json::{Map, Value};

/// Content type for a format. Text stays `text/plain` rather than a
/// charset-qualified variant, which some downstream CDX clients sniff.
pub fn content_type(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json | OutputFormat::JsonDict => "application/json",
        OutputFormat::Cdxj => "text/x-cdxj",
        OutputFormat::Text => "text/plain",
    }
}

/// Renders the captures a query produced into a response body.
pub fn render(query: &Query, captures: impl Iterator<Item = Result<Capture>>) -> Result<String> {
    match query.output {
        OutputFormat::Text => render_text(query, captures),
        OutputFormat::Json => render_json(query, captures),
        OutputFormat::JsonDict => render_json_dict(query, captures),
        OutputFormat::Cdxj => render_cdxj(query, captures),
    }
}

fn render_text(
    query: &Query,
    captures: impl Iterator<Item = Result<Capture>>,
) -> Result<String> {
    let mut out = String::new();
    for capture in captures {
        let capture = capture?;
        for (i, field) in query.fields.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match capture.get_text(field)? {
                Some(text) => out.push_str(&text),
                None => out.push('-'),
            }
        }
        out.push('\n');
    }
    Ok(out)
}

fn render_json(
    query: &Query,
    captures: impl Iterator<Item = Result<Capture>>,
) -> Result<String> {
    let mut rows = Vec::new();
    rows.push(Value::Array(
        query.fields.iter().map(|field| Value::from(field.as_str())).collect(),
    ));
    for capture in captures {
        let capture = capture?;
        let mut row = Vec::with_capacity(query.fields.len());
        for field in &query.fields {
            row.push(capture.get(field)?);
        }
        rows.push(Value::Array(row));
    }
    Ok(Value::Array(rows).to_string())
}

fn render_json_dict(
    query: &Query,
    captures: impl Iterator<Item = Result<Capture>>,
) -> Result<String> {
    let mut rows = Vec::new();
    for capture in captures {
        let capture = capture?;
        let mut object = Map::new();
        for field in &query.fields {
            let value = capture.get(field)?;
            if present(&value) {
                object.insert(field.clone(), value);
            }
        }
        rows.push(Value::Object(object));
    }
    Ok(Value::Array(rows).to_string())
}

fn render_cdxj(
    query: &Query,
    captures: impl Iterator<Item = Result<Capture>>,
) -> Result<String> {
    let mut out = String::new();
    for capture in captures {
        let capture = capture?;
        let mut object = Map::new();
        for field in &query.fields {
            if field == "urlkey" || field == "timestamp" {
                continue;
            }
            let value = capture.get(field)?;
            if !present(&value) {
                continue;
            }
            // pywb expects every scalar as a string
            let value = match value {
                Value::Number(number) => Value::from(number.to_string()),
                other => other,
            };
            object.insert(field.clone(), value);
        }
        if query.all_fields {
            for (name, value) in &capture.extra {
                object.insert(name.clone(), value.clone());
            }
        }
        out.push_str(&capture.urlkey);
        out.push(' ');
        out.push_str(&capture.timestamp.to_string());
        out.push(' ');
        out.push_str(&Value::Object(object).to_string());
        out.push('\n');
    }
    Ok(out)
}

fn present(value: &Value) -> bool {
    !value.is_null() && value.as_str() != Some("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdxhive_surt::UrlCanonicalizer;

    const LINE: &str = "- 20050614070159 http://www.nla.gov.au/ text/html 200 \
                        C2WHUTXHDBBUOXRIFGQP32N7CSH2EWMF - - 1036 327 example.warc.gz";

    fn capture() -> Capture {
        Capture::from_cdx_line(LINE, &UrlCanonicalizer::new()).unwrap()
    }

    fn query(params: &[(&str, &str)]) -> Query {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Query::from_params(&params, false).unwrap()
    }

    fn rendered(params: &[(&str, &str)], captures: Vec<Capture>) -> String {
        render(&query(params), captures.into_iter().map(Ok)).unwrap()
    }

    #[test]
    fn text_format_joins_default_fields_with_spaces() {
        let out = rendered(&[("url", "http://nla.gov.au/")], vec![capture()]);
        assert_eq!(
            out,
            "au,gov,nla)/ 20050614070159 http://www.nla.gov.au/ text/html 200 \
             C2WHUTXHDBBUOXRIFGQP32N7CSH2EWMF 1036 - - 327 example.warc.gz\n"
        );
    }

    #[test]
    fn text_format_renders_null_fields_as_dash() {
        let mut capture = capture();
        capture.length = -1;
        let out = rendered(
            &[("url", "x"), ("fl", "urlkey,length,offset")],
            vec![capture],
        );
        assert_eq!(out, "au,gov,nla)/ - 327\n");
    }

    #[test]
    fn json_format_leads_with_field_names() {
        let out = rendered(
            &[("url", "x"), ("fl", "urlkey,timestamp,statuscode,length"), ("output", "json")],
            vec![capture()],
        );
        assert_eq!(
            out,
            r#"[["urlkey","timestamp","statuscode","length"],["au,gov,nla)/",20050614070159,200,1036]]"#
        );
    }

    #[test]
    fn json_format_keeps_nulls_and_dashes() {
        let mut capture = capture();
        capture.length = -1;
        let out = rendered(
            &[("url", "x"), ("fl", "length,redirecturl"), ("output", "json")],
            vec![capture],
        );
        assert_eq!(out, r#"[["length","redirecturl"],[null,"-"]]"#);
    }

    #[test]
    fn jsondict_format_omits_null_and_dash_fields() {
        let out = rendered(
            &[
                ("url", "x"),
                ("fl", "urlkey,timestamp,statuscode,redirecturl,robotflags"),
                ("output", "jsondict"),
            ],
            vec![capture()],
        );
        assert_eq!(
            out,
            r#"[{"statuscode":200,"timestamp":20050614070159,"urlkey":"au,gov,nla)/"}]"#
        );
    }

    #[test]
    fn cdxj_format_stringifies_numbers_and_drops_key_fields() {
        let out = rendered(&[("url", "x"), ("output", "cdxj")], vec![capture()]);
        assert_eq!(
            out,
            "au,gov,nla)/ 20050614070159 \
             {\"digest\":\"C2WHUTXHDBBUOXRIFGQP32N7CSH2EWMF\",\"filename\":\"example.warc.gz\",\
             \"length\":\"1036\",\"mimetype\":\"text/html\",\"offset\":\"327\",\
             \"original\":\"http://www.nla.gov.au/\",\"statuscode\":\"200\"}\n"
        );
    }

    #[test]
    fn cdxj_format_appends_extra_fields_unless_fl_is_given() {
        let mut with_extra = capture();
        with_extra.put("method", Value::from("POST")).unwrap();

        let out = rendered(&[("url", "x"), ("output", "cdxj")], vec![with_extra.clone()]);
        assert!(out.contains(r#""method":"POST""#));

        let out = rendered(
            &[("url", "x"), ("output", "cdxj"), ("fl", "urlkey,timestamp,statuscode")],
            vec![with_extra],
        );
        assert!(!out.contains("method"));
    }

    #[test]
    fn empty_result_sets_render_cleanly() {
        assert_eq!(rendered(&[("url", "x")], vec![]), "");
        assert_eq!(
            rendered(&[("url", "x"), ("output", "json")], vec![]),
            r#"[["urlkey","timestamp","original","mimetype","statuscode","digest","length","redirecturl","robotflags","offset","filename"]]"#
        );
        assert_eq!(rendered(&[("url", "x"), ("output", "jsondict")], vec![]), "[]");
    }
}
