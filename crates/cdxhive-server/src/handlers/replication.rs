//! Replication feed endpoints.
//!
//! Secondaries poll `GET /{collection}/changes` and track their own cursor,
//! so the primary holds no per-replica state. Once every replica has passed
//! a sequence number the changelog can be truncated up to it.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use cdxhive_index::ChangeEvent;

use crate::handlers::{bad_request, index_error, internal_error, open_index, HttpError};
use crate::AppState;

/// Server side cap on the feed payload per request.
const DEFAULT_FEED_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Deserialize)]
pub struct ChangesParams {
    #[serde(default)]
    since: u64,
    size: Option<u64>,
}

pub async fn changes(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ChangesParams>,
) -> Result<Json<Vec<ChangeEvent>>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let size = params.size.unwrap_or(DEFAULT_FEED_SIZE);
    let events = tokio::task::spawn_blocking(move || {
        index.changes_since(params.since, size.min(usize::MAX as u64) as usize)
    })
    .await
    .map_err(internal_error)?
    .map_err(index_error)?;
    Ok(Json(events))
}

/// Latest committed sequence number, as bare text.
pub async fn sequence(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<String, HttpError> {
    let index = open_index(&state, &collection, false)?;
    Ok(index.latest_sequence().to_string())
}

/// Drops changelog entries up to and including the sequence number in the
/// request body.
pub async fn truncate(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: String,
) -> Result<Json<Value>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let up_to: u64 = body
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("bad sequence number: {}", body.trim())))?;
    let deleted = tokio::task::spawn_blocking(move || index.truncate_changelog(up_to))
        .await
        .map_err(internal_error)?
        .map_err(index_error)?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}
