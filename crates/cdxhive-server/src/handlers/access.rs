//! Access control endpoints: rule and policy CRUD plus access checks.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use cdxhive_access::{AccessDecision, AccessPolicy, AccessRule, RuleError};
use cdxhive_core::timestamp_to_date;
use cdxhive_index::Index;

use crate::handlers::{access_error, bad_request, mandatory, not_found, open_index, HttpError};
use crate::AppState;

// ---------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListRulesParams {
    search: Option<String>,
    sort: Option<String>,
}

pub async fn list_rules(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ListRulesParams>,
) -> Result<Response, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let mut rules = index.access().list_rules();
    if let Some(search) = &params.search {
        rules.retain(|rule| rule.contains(search));
    }
    let sort = params.sort.as_deref().unwrap_or("id");
    if sort.trim_start_matches('-') == "surt" {
        rules.sort_by_cached_key(|rule| {
            let prefix = rule
                .ssurt_prefixes()
                .ok()
                .and_then(|prefixes| prefixes.into_iter().next())
                .unwrap_or_default();
            (!rule.pinned, prefix, rule.id.unwrap_or(0))
        });
    }
    if sort.starts_with('-') {
        rules.reverse();
    }

    let mut response = Json(rules).into_response();
    let disposition = format!("filename=\"{collection}-access-rules.json\"");
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Saves one rule or an array of rules. All rules are validated before any
/// is stored, so a bad one rejects the whole request.
pub async fn post_rules(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let single = !body.is_array();
    let rules: Vec<AccessRule> = if single {
        vec![parse_json(body)?]
    } else {
        parse_json(body)?
    };

    let errors: Vec<RuleError> = rules.iter().flat_map(|rule| rule.validate()).collect();
    if !errors.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, Json(errors)).into_response());
    }

    let mut ids = Vec::with_capacity(rules.len());
    for rule in rules {
        ids.push(index.access().put_rule(rule).map_err(access_error)?);
    }

    if single {
        match ids.into_iter().next() {
            Some(id) => Ok(saved(id)),
            None => Ok(StatusCode::OK.into_response()),
        }
    } else {
        // Ids come back in input order, null for updates.
        Ok(Json(ids).into_response())
    }
}

/// Template rule with every field at its default, for the benefit of
/// clients building an editing form.
pub async fn new_rule() -> Json<AccessRule> {
    Json(AccessRule::default())
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path((collection, rule_id)): Path<(String, u64)>,
) -> Result<Json<AccessRule>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    match index.access().rule(rule_id) {
        Some(rule) => Ok(Json(rule)),
        None => Err(not_found()),
    }
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path((collection, rule_id)): Path<(String, u64)>,
) -> Result<StatusCode, HttpError> {
    let index = open_index(&state, &collection, false)?;
    if index.access().delete_rule(rule_id).map_err(access_error)? {
        Ok(StatusCode::OK)
    } else {
        Err(not_found())
    }
}

// ---------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------

pub async fn list_policies(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<AccessPolicy>>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    Ok(Json(index.access().list_policies()))
}

pub async fn post_policy(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(policy): Json<AccessPolicy>,
) -> Result<Response, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let id = index.access().put_policy(policy).map_err(access_error)?;
    Ok(saved(id))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path((collection, policy_id)): Path<(String, u64)>,
) -> Result<Json<AccessPolicy>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    match index.access().policy(policy_id) {
        Some(policy) => Ok(Json(policy)),
        None => Err(not_found()),
    }
}

// ---------------------------------------------------------------------
// Access checks
// ---------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CheckParams {
    url: Option<String>,
    timestamp: Option<String>,
}

/// Would a capture of this URL and timestamp be served through this access
/// point right now?
pub async fn check(
    State(state): State<AppState>,
    Path((collection, access_point)): Path<(String, String)>,
    Query(params): Query<CheckParams>,
) -> Result<Json<AccessDecision>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let url = mandatory(params.url, "url")?;
    let timestamp = mandatory(params.timestamp, "timestamp")?;
    Ok(Json(decide(&index, &access_point, &url, &timestamp)?))
}

#[derive(Deserialize)]
pub struct BulkCheckQuery {
    url: String,
    timestamp: String,
}

pub async fn check_bulk(
    State(state): State<AppState>,
    Path((collection, access_point)): Path<(String, String)>,
    Json(queries): Json<Vec<BulkCheckQuery>>,
) -> Result<Json<Vec<AccessDecision>>, HttpError> {
    let index = open_index(&state, &collection, false)?;
    let mut decisions = Vec::with_capacity(queries.len());
    for query in &queries {
        decisions.push(decide(&index, &access_point, &query.url, &query.timestamp)?);
    }
    Ok(Json(decisions))
}

fn decide(
    index: &Index,
    access_point: &str,
    url: &str,
    timestamp: &str,
) -> Result<AccessDecision, HttpError> {
    let timestamp: u64 = timestamp
        .parse()
        .map_err(|_| bad_request(format!("bad timestamp: {timestamp}")))?;
    let capture_time =
        timestamp_to_date(timestamp).map_err(|err| bad_request(err.to_string()))?;
    Ok(index
        .access()
        .check_access(access_point, url, capture_time, Utc::now()))
}

fn parse_json<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, HttpError> {
    serde_json::from_value(body).map_err(|err| bad_request(format!("invalid access rule: {err}")))
}

fn saved(id: Option<u64>) -> Response {
    match id {
        Some(id) => (StatusCode::CREATED, Json(json!({ "id": id.to_string() }))).into_response(),
        None => StatusCode::OK.into_response(),
    }
}
