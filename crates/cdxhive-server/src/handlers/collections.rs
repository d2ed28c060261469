//! Collection listing and inspection endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use cdxhive_core::Capture;
use cdxhive_index::Alias;

use crate::handlers::{index_error, internal_error, open_index, HttpError};
use crate::AppState;

pub async fn list_collections(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, HttpError> {
    let collections = state.store.list_collections().map_err(internal_error)?;
    Ok(Json(collections))
}

#[derive(Deserialize)]
pub struct StatsParams {
    property: Option<String>,
}

/// Record count estimate plus any storage engine properties asked for with
/// `?property=name,name`.
pub async fn stats(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Value>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let mut stats = Map::new();
    let count = index.estimated_record_count().map_err(index_error)?;
    stats.insert("estimatedRecordCount".to_string(), json!(count));
    for name in params
        .property
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|name| !name.is_empty())
    {
        let value = match index.property(name) {
            Ok(Some(value)) => json!(value),
            Ok(None) => Value::Null,
            Err(err) => json!(format!("ERROR: {err}")),
        };
        stats.insert(name.to_string(), value);
    }
    Ok(Json(Value::Object(stats)))
}

#[derive(Deserialize)]
pub struct ScanParams {
    #[serde(default)]
    key: String,
    #[serde(default = "default_scan_limit")]
    limit: usize,
}

fn default_scan_limit() -> usize {
    1000
}

/// Raw dump of stored captures from `key` onward, for debugging.
pub async fn list_captures(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ScanParams>,
) -> Result<Json<Vec<Value>>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let rows = tokio::task::spawn_blocking(move || -> cdxhive_index::Result<Vec<Value>> {
        let mut rows = Vec::new();
        for capture in index.captures_after(&params.key)?.take(params.limit) {
            rows.push(capture_json(&capture?));
        }
        Ok(rows)
    })
    .await
    .map_err(internal_error)?
    .map_err(index_error)?;
    Ok(Json(rows))
}

pub async fn list_aliases(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ScanParams>,
) -> Result<Json<Vec<Alias>>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let aliases = tokio::task::spawn_blocking(move || -> cdxhive_index::Result<Vec<Alias>> {
        index.list_aliases(&params.key)?.take(params.limit).collect()
    })
    .await
    .map_err(internal_error)?
    .map_err(index_error)?;
    Ok(Json(aliases))
}

fn capture_json(capture: &Capture) -> Value {
    json!({
        "urlkey": capture.urlkey,
        "timestamp": capture.timestamp,
        "original": capture.original,
        "mimetype": capture.mimetype,
        "status": capture.status,
        "digest": capture.digest,
        "length": capture.length,
        "file": capture.file,
        "compressedoffset": capture.compressed_offset,
        "redirecturl": capture.redirecturl,
        "robotflags": capture.robotflags,
        "originalLength": capture.original_length,
        "originalCompressedoffset": capture.original_compressed_offset,
        "originalFile": capture.original_file,
    })
}
