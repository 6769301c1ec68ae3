use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{parse_entries, FeedFetcher, FeedSource};
use crate::reconcile::{candidate_links, reconcile};

/// Outcome of one pass over every configured feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows inserted or replaced across all feeds.
    pub stored: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

pub struct App<S = FeedFetcher> {
    config: Arc<Config>,
    repository: Repository,
    source: S,
}

impl<S: FeedSource> App<S> {
    pub fn new(config: Arc<Config>, repository: Repository, source: S) -> Self {
        Self {
            config,
            repository,
            source,
        }
    }

    /// Polls all feeds every `interval` until a fatal error occurs.
    pub async fn run(&self, interval: Duration) -> Result<Infallible> {
        info!(
            "Monitoring {} feed(s) every {} minute(s)",
            self.config.feeds.len(),
            interval.as_secs() / 60
        );

        loop {
            let report = self.run_cycle().await?;
            info!(
                "Cycle done: {} feed(s) ok, {} failed, {} entries stored",
                report.succeeded.len(),
                report.failed.len(),
                report.stored
            );
            tokio::time::sleep(interval).await;
        }
    }

    /// Processes every feed once, in key order. A feed's failure is logged
    /// and the cycle moves on; only fatal errors end it early.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for (key, url) in self.config.feeds() {
            match self.poll_feed(key, url).await {
                Ok(stored) => {
                    report.stored += stored;
                    report.succeeded.push(key.to_string());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log_feed_failure(key, &e);
                    report.failed.push(key.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Fetch, parse, reconcile and store one feed. Returns the rows written.
    pub async fn poll_feed(&self, key: &str, url: &str) -> Result<usize> {
        let bytes = self.source.fetch(url, self.config.cookies_for(key)).await?;
        info!("Fetched {}, content length: {}", key, bytes.len());

        let entries = parse_entries(&bytes)?;
        if let Some(newest) = entries.first() {
            debug!("{}: first entry {:?}", key, newest.title);
        }

        let table = self.repository.ensure_table(key).await?;
        let links = candidate_links(&entries);
        let existing = self
            .repository
            .load_existing_publish_times(&table, &links)
            .await?;

        let fetched = entries.len();
        let decisions = reconcile(&existing, entries);
        if decisions.is_empty() {
            debug!("{}: nothing new among {} entries", key, fetched);
            return Ok(0);
        }

        let stored = self.repository.apply_decisions(&table, decisions).await?;
        info!("Stored {} new or updated entries in {}", stored, table.name());
        Ok(stored)
    }
}

fn log_feed_failure(key: &str, err: &AppError) {
    match err {
        AppError::Fetch(_) => warn!("Skipping {} this cycle: {}", key, err),
        AppError::Parse(_) => error!("{} returned no usable feed: {}", key, err),
        _ => error!("Failed to store {}: {}", key, err),
    }
}
