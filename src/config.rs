use std::time::Duration;

use crate::error::ConfigError;

pub(crate) const DEFAULT_CONCURRENCY: usize = 10;
pub(crate) const DEFAULT_BATCH_SIZE: usize = 500;
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
pub(crate) const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);
pub(crate) const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Runtime settings for a crawl run, resolved from CLI flags and environment.
#[derive(Clone, Debug)]
pub(crate) struct CrawlerConfig {
    pub(crate) bearer_token: String,
    pub(crate) schema: String,
    pub(crate) input_table: String,
    pub(crate) url_column: String,
    pub(crate) output_base: String,
    pub(crate) concurrency: usize,
    pub(crate) batch_size: usize,
    pub(crate) max_retries: u32,
    pub(crate) min_refresh_interval: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) proxy: Option<String>,
    /// Base of the exponential backoff between attempts.
    pub(crate) backoff_base: Duration,
    /// Upper bound of a single backoff wait.
    pub(crate) max_backoff: Duration,
    /// Wait per attempt index when the API answers 429.
    pub(crate) rate_limit_step: Duration,
    /// Bounds of the random pause before every tweet request.
    pub(crate) request_jitter: (Duration, Duration),
    /// Bounds of the random pause before a cookie scrape.
    pub(crate) scrape_jitter: (Duration, Duration),
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            bearer_token: String::new(),
            schema: "Twitter".to_string(),
            input_table: "input_tb".to_string(),
            url_column: "tweetUrl".to_string(),
            output_base: "tweets".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            proxy: None,
            backoff_base: Duration::from_secs(1),
            max_backoff: DEFAULT_MAX_BACKOFF,
            rate_limit_step: Duration::from_secs(15),
            request_jitter: (Duration::from_millis(500), Duration::from_millis(1500)),
            scrape_jitter: (Duration::from_secs(1), Duration::from_secs(3)),
        }
    }
}

impl CrawlerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.bearer_token.is_empty() {
            return Err(ConfigError::Missing("bearer token"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch size"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Zero("max retries"));
        }
        if let Some(proxy) = &self.proxy {
            reqwest::Proxy::all(proxy).map_err(|e| ConfigError::Proxy(proxy.clone(), e))?;
        }
        Ok(())
    }

    /// Output table for the given run date, e.g. `tweets_20251013`.
    pub(crate) fn output_table(&self, date: chrono::NaiveDate) -> String {
        format!("{}_{}", self.output_base, date.format("%Y%m%d"))
    }
}
