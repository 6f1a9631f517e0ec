use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};

use crate::api::TweetApi;
use crate::config::CrawlerConfig;
use crate::credentials::CredentialManager;
use crate::error::CrawlerError;
use crate::fetcher::CredentialSource;
use crate::retry::{RetryOrchestrator, RetryPolicy};
use crate::store::{ItemStatus, TargetItem, TweetStore};
use crate::worker::FetchWorker;

#[derive(Debug)]
pub(crate) struct RunSummary {
    pub(crate) run_start: DateTime<Utc>,
    pub(crate) run_end: DateTime<Utc>,
    pub(crate) counts: HashMap<ItemStatus, usize>,
}

impl RunSummary {
    pub(crate) fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub(crate) fn count(&self, status: ItemStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

/// Runs every pending URL through the retrying fetch pipeline, at most
/// `concurrency` at a time, one batch after another.
pub(crate) struct Crawler {
    config: CrawlerConfig,
    store: Arc<dyn TweetStore>,
    credentials: Arc<CredentialManager>,
    orchestrator: RetryOrchestrator,
}

impl Crawler {
    pub(crate) fn new(
        config: CrawlerConfig,
        store: Arc<dyn TweetStore>,
        api: Arc<dyn TweetApi>,
        source: Arc<dyn CredentialSource>,
    ) -> Self {
        let credentials = Arc::new(CredentialManager::new(
            config.bearer_token.clone(),
            source,
            config.min_refresh_interval,
        ));
        let worker = FetchWorker::new(
            api,
            credentials.clone(),
            config.request_jitter,
            config.rate_limit_step,
        );
        let orchestrator = RetryOrchestrator::new(
            worker,
            RetryPolicy {
                max_attempts: config.max_retries,
                backoff_base: config.backoff_base,
                max_backoff: config.max_backoff,
            },
        );
        Self {
            config,
            store,
            credentials,
            orchestrator,
        }
    }

    /// Store read failures abort the run; everything per item is absorbed.
    pub(crate) async fn run(&self) -> Result<RunSummary, CrawlerError> {
        let run_start = Utc::now();
        let output_table = self.config.output_table(run_start.date_naive());
        self.store.ensure_output_table(&output_table).await?;

        let pending: Vec<TargetItem> = self
            .store
            .fetch_pending(&self.config.input_table)
            .await?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Pending)
            .collect();
        info!("Found {} pending tweets", pending.len());

        let mut counts = HashMap::new();
        if let Some(first) = pending.first() {
            if let Err(e) = self.credentials.refresh(&first.url).await {
                warn!("Initial token refresh failed, workers will retry: {}", e);
            }
            info!("Credentials after initial refresh: {:?}", self.credentials.state());
        }

        let batches = pending.len().div_ceil(self.config.batch_size);
        for (index, batch) in pending.chunks(self.config.batch_size).enumerate() {
            info!(
                "Processing batch {}/{} ({} tweets)",
                index + 1,
                batches,
                batch.len()
            );
            let statuses: Vec<ItemStatus> = stream::iter(batch)
                .map(|item| self.process_item(item, &output_table))
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;
            for status in statuses {
                *counts.entry(status).or_insert(0) += 1;
            }
        }

        let summary = RunSummary {
            run_start,
            run_end: Utc::now(),
            counts,
        };
        info!(
            "Session summary: {} tweets in {}s (done {}, parse_failed {}, error {}, invalid_url {})",
            summary.total(),
            (summary.run_end - summary.run_start).num_milliseconds() as f64 / 1000.0,
            summary.count(ItemStatus::Done),
            summary.count(ItemStatus::ParseFailed),
            summary.count(ItemStatus::Error),
            summary.count(ItemStatus::InvalidUrl),
        );
        Ok(summary)
    }

    async fn process_item(&self, item: &TargetItem, output_table: &str) -> ItemStatus {
        let result = self.orchestrator.process(&item.url).await;
        let mut status = result.status;
        if status == ItemStatus::Done {
            info!("{} {} after {} attempt(s)", result.url, status, result.attempts);
        } else {
            warn!("{} {} after {} attempt(s)", result.url, status, result.attempts);
        }

        if let (Some(record), Some(raw)) = (&result.record, &result.raw) {
            if let Err(e) = self
                .store
                .insert_result(output_table, &item.url, record, raw)
                .await
            {
                error!("Error inserting tweet {}: {}", item.url, e);
                status = ItemStatus::Error;
            }
        }

        if let Err(e) = self
            .store
            .update_status(&self.config.input_table, &item.url, status)
            .await
        {
            error!("Error updating status for {} to {}: {}", item.url, status, e);
        }
        status
    }
}
