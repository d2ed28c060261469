//! CDX ingest and delete endpoints.
//!
//! Both take a plain text body of CDX lines, the same format `cdx-indexer`
//! and friends emit. Lines are staged into one batch so a POST is all or
//! nothing unless `badLines=skip` is given.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use cdxhive_core::Capture;
use cdxhive_index::{Batch, Index};
use cdxhive_surt::UrlCanonicalizer;

use crate::handlers::{index_error, internal_error, open_index, require_write_access, HttpError};
use crate::AppState;

#[derive(Deserialize)]
pub struct IngestParams {
    #[serde(rename = "badLines")]
    bad_lines: Option<String>,
}

pub async fn add_captures(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<IngestParams>,
    body: String,
) -> Result<(StatusCode, String), HttpError> {
    require_write_access(&state)?;
    let index = open_index(&state, &collection, true)?;
    let skip_bad_lines = params.bad_lines.as_deref() == Some("skip");
    let canonicalizer = state.canonicalizer.clone();

    let added =
        tokio::task::spawn_blocking(move || add_lines(&index, &canonicalizer, &body, skip_bad_lines))
            .await
            .map_err(internal_error)??;

    Ok((StatusCode::OK, format!("Added {added} records\n")))
}

fn add_lines(
    index: &Index,
    canonicalizer: &UrlCanonicalizer,
    body: &str,
    skip_bad_lines: bool,
) -> Result<u64, HttpError> {
    let mut batch = index.batch();
    let mut added = 0u64;
    for line in body.lines() {
        if line.starts_with(" CDX") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@alias ") {
            // Alias problems always abort, even in skip mode.
            add_alias(&mut batch, canonicalizer, rest).map_err(|message| bad_line(line, &message))?;
            added += 1;
        } else {
            match Capture::from_cdx_line(line, canonicalizer) {
                Ok(capture) => {
                    batch
                        .put_capture(capture)
                        .map_err(|err| bad_line(line, &err.to_string()))?;
                    added += 1;
                }
                Err(err) if skip_bad_lines => {
                    warn!("skipping bad cdx line: {} ({})", line, err);
                }
                Err(err) => return Err(bad_line(line, &err.to_string())),
            }
        }
    }
    if batch.is_empty() {
        return Ok(added);
    }
    let sequence = batch.commit().map_err(index_error)?;
    info!(
        "added {} records to {} (sequence {})",
        added,
        index.name(),
        sequence
    );
    Ok(added)
}

fn add_alias(
    batch: &mut Batch<'_>,
    canonicalizer: &UrlCanonicalizer,
    rest: &str,
) -> std::result::Result<(), String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(alias), Some(target)) => {
            let alias_key = canonicalizer.surt_canonicalize(alias);
            let target_key = canonicalizer.surt_canonicalize(target);
            batch
                .put_alias(&alias_key, &target_key)
                .map_err(|err| err.to_string())
        }
        _ => Err("expected '@alias <url> <target-url>'".to_string()),
    }
}

#[derive(Deserialize)]
pub struct DeleteParams {
    recanonicalize: Option<String>,
}

pub async fn delete_captures(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<DeleteParams>,
    body: String,
) -> Result<(StatusCode, String), HttpError> {
    require_write_access(&state)?;
    let index = open_index(&state, &collection, false)?;
    let recanonicalize = params.recanonicalize.as_deref() != Some("0");
    let canonicalizer = state.canonicalizer.clone();

    let deleted =
        tokio::task::spawn_blocking(move || delete_lines(&index, &canonicalizer, &body, recanonicalize))
            .await
            .map_err(internal_error)??;

    Ok((StatusCode::OK, format!("Deleted {deleted} records\n")))
}

fn delete_lines(
    index: &Index,
    canonicalizer: &UrlCanonicalizer,
    body: &str,
    recanonicalize: bool,
) -> Result<u64, HttpError> {
    let mut batch = index.batch();
    let mut deleted = 0u64;
    for line in body.lines() {
        if line.starts_with(" CDX") {
            continue;
        }
        if line.starts_with("@alias ") {
            return Err(bad_line(line, "deleting aliases is not supported"));
        }
        let capture = if recanonicalize {
            Capture::from_cdx_line(line, canonicalizer).map_err(|err| bad_line(line, &err.to_string()))?
        } else {
            keyed_capture(line).map_err(|message| bad_line(line, &message))?
        };
        batch
            .delete_capture(&capture)
            .map_err(|err| bad_line(line, &err.to_string()))?;
        deleted += 1;
    }
    if !batch.is_empty() {
        batch.commit().map_err(index_error)?;
    }
    Ok(deleted)
}

/// Takes the urlkey and timestamp verbatim from the line, for deleting
/// records whose keys predate the current canonicalization rules.
fn keyed_capture(line: &str) -> std::result::Result<Capture, String> {
    let mut fields = line.split(' ');
    match (fields.next(), fields.next()) {
        (Some(urlkey), Some(timestamp)) => Ok(Capture {
            urlkey: urlkey.to_string(),
            timestamp: timestamp
                .parse()
                .map_err(|_| format!("bad timestamp: {timestamp}"))?,
            ..Capture::default()
        }),
        _ => Err("expected a urlkey and timestamp".to_string()),
    }
}

fn bad_line(line: &str, message: &str) -> HttpError {
    (StatusCode::BAD_REQUEST, format!("At line: {line}\n{message}\n"))
}
