//! CDX query endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query as UrlParams, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use cdxhive_index::{Index, Query};

use crate::handlers::{index_error, internal_error, open_index, HttpError};
use crate::output;
use crate::AppState;

/// Response header carrying the resolved urlkey, which lets clients see
/// what the queried URL canonicalized to.
const URLKEY_HEADER: HeaderName = HeaderName::from_static("cdxhive-urlkey");

pub async fn query_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    UrlParams(params): UrlParams<Vec<(String, String)>>,
) -> Result<Response, HttpError> {
    let index = open_index(&state, &collection, false)?;
    if params.is_empty() {
        return collection_details(&index);
    }
    run_query(state, index, params).await
}

/// Same as [`query_collection`] but filtered through an access point, for
/// serving different audiences from one index.
pub async fn query_access_point(
    State(state): State<AppState>,
    Path((collection, access_point)): Path<(String, String)>,
    UrlParams(mut params): UrlParams<Vec<(String, String)>>,
) -> Result<Response, HttpError> {
    let index = open_index(&state, &collection, false)?;
    params.push(("accesspoint".to_string(), access_point));
    run_query(state, index, params).await
}

async fn run_query(
    state: AppState,
    index: Arc<Index>,
    params: Vec<(String, String)>,
) -> Result<Response, HttpError> {
    let mut query = Query::from_params(&params, state.cdx14).map_err(index_error)?;
    let canonicalizer = state.canonicalizer.clone();
    let (body, urlkey, format) = tokio::task::spawn_blocking(move || {
        let captures = query.execute(&index, &canonicalizer)?;
        let body = output::render(&query, captures)?;
        Ok::<_, cdxhive_index::Error>((body, query.urlkey.unwrap_or_default(), query.output))
    })
    .await
    .map_err(internal_error)?
    .map_err(index_error)?;

    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(output::content_type(format)),
    );
    if let Ok(value) = HeaderValue::from_str(&urlkey) {
        response.headers_mut().insert(URLKEY_HEADER, value);
    }
    Ok(response)
}

/// Plain details page shown when a collection is fetched with no
/// parameters at all.
fn collection_details(index: &Index) -> Result<Response, HttpError> {
    let mut page = String::from(
        "<form>URL: <input name=url type=url><button type=submit>Query</button></form>\n<pre>",
    );
    if let Some(stats) = index.property("rocksdb.stats").map_err(index_error)? {
        page.push_str(&stats);
    }
    let count = index.estimated_record_count().map_err(index_error)?;
    page.push_str(&format!("\nEstimated number of records: {count}"));
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/html")], page).into_response())
}
