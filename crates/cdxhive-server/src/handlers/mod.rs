//! HTTP request handlers.

pub mod access;
pub mod collections;
pub mod ingest;
pub mod query;
pub mod replication;

use std::sync::Arc;

use axum::http::StatusCode;

use cdxhive_index::{Error, Index};

use crate::AppState;

/// Handler errors render as a status code and plain text message.
pub(crate) type HttpError = (StatusCode, String);

pub(crate) fn open_index(
    state: &AppState,
    collection: &str,
    create: bool,
) -> Result<Arc<Index>, HttpError> {
    match state.store.index(collection, create) {
        Ok(Some(index)) => Ok(index),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            format!("Collection {collection} does not exist"),
        )),
        Err(err) => Err(index_error(err)),
    }
}

/// Secondaries refuse capture writes so the change poller stays the only
/// writer. Access control stays editable since rules are node-local.
pub(crate) fn require_write_access(state: &AppState) -> Result<(), HttpError> {
    if state.read_only {
        return Err((
            StatusCode::FORBIDDEN,
            "This node is running in secondary mode to an upstream primary, \
             and will not accept writes."
                .to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn index_error(err: Error) -> HttpError {
    match err {
        Error::InvalidQuery(_) | Error::InvalidCollectionName(_) => {
            (StatusCode::BAD_REQUEST, format!("{err}\n"))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")),
    }
}

pub(crate) fn access_error(err: cdxhive_access::Error) -> HttpError {
    match err {
        cdxhive_access::Error::NoSuchPolicy(_)
        | cdxhive_access::Error::MissingPolicyId
        | cdxhive_access::Error::InvalidRule(_) => (StatusCode::BAD_REQUEST, format!("{err}\n")),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")),
    }
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> HttpError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n"))
}

pub(crate) fn bad_request(message: String) -> HttpError {
    (StatusCode::BAD_REQUEST, format!("{message}\n"))
}

pub(crate) fn not_found() -> HttpError {
    (StatusCode::NOT_FOUND, "Not found\n".to_string())
}

/// Unwraps a query parameter the endpoint cannot work without.
pub(crate) fn mandatory<T>(value: Option<T>, name: &str) -> Result<T, HttpError> {
    value.ok_or_else(|| bad_request(format!("missing mandatory parameter: {name}")))
}
