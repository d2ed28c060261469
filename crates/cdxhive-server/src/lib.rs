//! HTTP front end for the capture index.
//!
//! ## Endpoints
//!
//! * `GET /api/collections` lists collections
//! * `GET /{collection}` runs a CDX query, `POST` ingests CDX lines and
//!   `POST /{collection}/delete` removes them
//! * `GET /{collection}/ap/{accesspoint}` queries through an access point,
//!   with `/check` deciding individual URLs
//! * `/{collection}/access/rules` and `/access/policies` manage the access
//!   control tables
//! * `GET /{collection}/changes`, `/sequence` and
//!   `POST /{collection}/truncate_replication` drive replication
//!
//! Collections are created implicitly by the first ingest POST. Every
//! response allows cross origin use since replay tools run in browsers.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cdxhive_index::DataStore;
use cdxhive_surt::UrlCanonicalizer;

pub mod config;
pub mod handlers;
pub mod output;
pub mod poller;
pub mod shutdown;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DataStore>,
    pub canonicalizer: Arc<UrlCanonicalizer>,
    /// Report the 14 field CDX format by default instead of CDX11.
    pub cdx14: bool,
    /// Refuse capture writes, set for secondaries without `--accept-writes`.
    pub read_only: bool,
}

/// Create the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/collections", get(handlers::collections::list_collections))
        .route(
            "/:collection",
            get(handlers::query::query_collection).post(handlers::ingest::add_captures),
        )
        .route("/:collection/delete", post(handlers::ingest::delete_captures))
        .route("/:collection/stats", get(handlers::collections::stats))
        .route("/:collection/captures", get(handlers::collections::list_captures))
        .route("/:collection/aliases", get(handlers::collections::list_aliases))
        .route("/:collection/sequence", get(handlers::replication::sequence))
        .route("/:collection/changes", get(handlers::replication::changes))
        .route(
            "/:collection/truncate_replication",
            post(handlers::replication::truncate),
        )
        .route(
            "/:collection/ap/:accesspoint",
            get(handlers::query::query_access_point),
        )
        .route(
            "/:collection/ap/:accesspoint/check",
            get(handlers::access::check).post(handlers::access::check_bulk),
        )
        .route(
            "/:collection/access/rules",
            get(handlers::access::list_rules).post(handlers::access::post_rules),
        )
        .route("/:collection/access/rules/new", get(handlers::access::new_rule))
        .route(
            "/:collection/access/rules/:rule_id",
            get(handlers::access::get_rule).delete(handlers::access::delete_rule),
        )
        .route(
            "/:collection/access/policies",
            get(handlers::access::list_policies).post(handlers::access::post_policy),
        )
        .route(
            "/:collection/access/policies/:policy_id",
            get(handlers::access::get_policy),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the router until the shutdown future completes.
pub async fn serve<F>(
    router: Router,
    bind_address: &str,
    port: u16,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind((bind_address, port)).await?;
    tracing::info!("listening on http://{}:{}", bind_address, port);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
