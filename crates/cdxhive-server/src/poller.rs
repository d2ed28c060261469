//! Change polling for secondary mode.
//!
//! A secondary runs one [`ChangePoller`] per `--primary` collection URL.
//! Each cycle reads the local replication cursor, fetches everything the
//! primary has past it and applies the batches in order. Polling errors are
//! logged and retried on the next cycle, so a rebooting primary just delays
//! replication rather than wedging it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cdxhive_index::{ChangeEvent, Index};

/// Where replication events come from, normally a primary's `/changes`
/// endpoint.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn changes_since(&self, since: u64, size: u64) -> anyhow::Result<Vec<ChangeEvent>>;
}

/// Fetches changes over HTTP from a collection URL on the primary.
pub struct HttpChangeSource {
    client: reqwest::Client,
    collection_url: String,
}

impl HttpChangeSource {
    pub fn new(collection_url: &str) -> anyhow::Result<HttpChangeSource> {
        // Long read timeout: a feed batch can be most of --batch-size bytes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(HttpChangeSource {
            client,
            collection_url: collection_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChangeSource for HttpChangeSource {
    async fn changes_since(&self, since: u64, size: u64) -> anyhow::Result<Vec<ChangeEvent>> {
        let url = format!("{}/changes?size={}&since={}", self.collection_url, size, since);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", url, status, body.trim());
        }
        Ok(response.json().await?)
    }
}

/// Background task keeping one collection in sync with its primary.
pub struct ChangePoller {
    primary: String,
    index: Arc<Index>,
    source: Box<dyn ChangeSource>,
    interval: Duration,
    batch_size: u64,
}

impl ChangePoller {
    pub fn new(
        primary: String,
        index: Arc<Index>,
        source: Box<dyn ChangeSource>,
        interval: Duration,
        batch_size: u64,
    ) -> ChangePoller {
        ChangePoller {
            primary,
            index,
            source,
            interval,
            batch_size,
        }
    }

    /// Poll until shutdown is signalled. The first poll happens
    /// immediately so a restarted secondary catches up without waiting out
    /// an interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "polling {} for changes every {:?}",
            self.primary, self.interval
        );
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(applied) => {
                    debug!("{}: applied {} change batches", self.primary, applied)
                }
                Err(err) => warn!("{}: replication poll failed: {:#}", self.primary, err),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("{}: change poller stopped", self.primary);
    }

    /// One polling cycle: fetch and apply batches until the primary has
    /// nothing past our cursor. Returns how many batches were applied.
    async fn poll_once(&self) -> anyhow::Result<u64> {
        let mut applied = 0u64;
        loop {
            let index = self.index.clone();
            let since = tokio::task::spawn_blocking(move || index.replication_cursor()).await??;
            let events = self.source.changes_since(since, self.batch_size).await?;
            if events.is_empty() {
                return Ok(applied);
            }
            applied += events.len() as u64;
            let first = events.first().map(|event| event.sequence_number).unwrap_or(0);
            let last = events.last().map(|event| event.sequence_number).unwrap_or(0);
            let index = self.index.clone();
            tokio::task::spawn_blocking(move || index.apply_changes(&events)).await??;
            debug!("{}: applied sequences {}..{}", self.primary, first, last);
        }
    }
}
