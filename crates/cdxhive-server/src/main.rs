use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cdxhive_index::DataStore;
use cdxhive_server::config::Config;
use cdxhive_server::poller::{ChangePoller, HttpChangeSource};
use cdxhive_server::shutdown::shutdown_signal;
use cdxhive_server::{create_router, serve, AppState};
use cdxhive_surt::UrlCanonicalizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let default_filter = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let canonicalizer = match &config.fuzzy_rules {
        Some(path) => UrlCanonicalizer::with_fuzzy_rules(path)
            .with_context(|| format!("loading fuzzy rules from {}", path.display()))?,
        None => UrlCanonicalizer::new(),
    };

    let store = DataStore::open(&config.data_dir, config.store_config())
        .with_context(|| format!("opening data store at {}", config.data_dir.display()))?;

    let state = AppState {
        store: Arc::new(store),
        canonicalizer: Arc::new(canonicalizer),
        cdx14: config.cdx14,
        read_only: config.read_only(),
    };
    if state.read_only {
        info!("running as a read-only secondary");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pollers = Vec::new();
    for url in &config.primaries {
        let collection = collection_from_url(url)?;
        let index = match state.store.index(&collection, true)? {
            Some(index) => index,
            None => anyhow::bail!("could not open collection {collection}"),
        };
        let poller = ChangePoller::new(
            url.clone(),
            index,
            Box::new(HttpChangeSource::new(url)?),
            Duration::from_secs(config.update_interval),
            config.batch_size,
        );
        pollers.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    let router = create_router(state);
    serve(router, &config.bind_address, config.port, async {
        shutdown_signal().await;
        info!("shutting down");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    for poller in pollers {
        let _ = poller.await;
    }
    Ok(())
}

/// The collection to replicate into is the last path segment of the
/// primary URL.
fn collection_from_url(url: &str) -> anyhow::Result<String> {
    let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains(':') {
        anyhow::bail!("cannot determine a collection name from primary URL {url}");
    }
    Ok(name.to_string())
}
