use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use reqwest::Url;
use serde_json::Value;

use crate::api::TweetApi;
use crate::credentials::CredentialManager;
use crate::error::{CredentialError, TransportError};
use crate::retry::random_delay;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FailureReason {
    InvalidUrl,
    AuthExpired,
    RateLimited,
    UnexpectedStatus(u16),
    NetworkError(String),
    UnexpectedError(String),
    ExhaustedRetries,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidUrl => write!(f, "invalid url"),
            FailureReason::AuthExpired => write!(f, "auth expired"),
            FailureReason::RateLimited => write!(f, "rate limited"),
            FailureReason::UnexpectedStatus(status) => write!(f, "unexpected status {status}"),
            FailureReason::NetworkError(e) => write!(f, "network error: {e}"),
            FailureReason::UnexpectedError(e) => write!(f, "unexpected error: {e}"),
            FailureReason::ExhaustedRetries => write!(f, "exhausted retries"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum FetchOutcome {
    Success(Value),
    Retryable {
        reason: FailureReason,
        /// Replaces the default backoff before the next attempt.
        retry_after: Option<Duration>,
    },
    TerminalFailure(FailureReason),
}

impl FetchOutcome {
    fn retry(reason: FailureReason) -> Self {
        FetchOutcome::Retryable {
            reason,
            retry_after: None,
        }
    }
}

/// Last non-empty path segment of a post URL, e.g. the status id.
pub(crate) fn extract_tweet_id(tweet_url: &str) -> Option<String> {
    let url = Url::parse(tweet_url.trim()).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Linear wait for a 429 on the given 1-based attempt.
pub(crate) fn rate_limit_wait(step: Duration, attempt: u32) -> Duration {
    step * attempt.max(1)
}

/// Performs single fetch attempts against the tweet endpoint.
pub(crate) struct FetchWorker {
    api: Arc<dyn TweetApi>,
    credentials: Arc<CredentialManager>,
    request_jitter: (Duration, Duration),
    rate_limit_step: Duration,
}

impl FetchWorker {
    pub(crate) fn new(
        api: Arc<dyn TweetApi>,
        credentials: Arc<CredentialManager>,
        request_jitter: (Duration, Duration),
        rate_limit_step: Duration,
    ) -> Self {
        Self {
            api,
            credentials,
            request_jitter,
            rate_limit_step,
        }
    }

    async fn current_headers(
        &self,
        tweet_url: &str,
    ) -> Result<reqwest::header::HeaderMap, CredentialError> {
        match self.credentials.headers() {
            Err(CredentialError::NotInitialized) => {
                self.credentials.refresh(tweet_url).await?;
                self.credentials.headers()
            }
            other => other,
        }
    }

    /// One request for `tweet_url`; `attempt` is 1-based.
    pub(crate) async fn attempt(&self, tweet_url: &str, attempt: u32) -> FetchOutcome {
        let Some(tweet_id) = extract_tweet_id(tweet_url) else {
            warn!("Invalid tweet URL: {}", tweet_url);
            return FetchOutcome::TerminalFailure(FailureReason::InvalidUrl);
        };

        let headers = match self.current_headers(tweet_url).await {
            Ok(headers) => headers,
            Err(e) => {
                warn!("No usable credentials for {}: {}", tweet_url, e);
                return FetchOutcome::retry(FailureReason::AuthExpired);
            }
        };

        tokio::time::sleep(random_delay(self.request_jitter)).await;

        let response = match self.api.get_tweet(&tweet_id, headers).await {
            Ok(response) => response,
            Err(TransportError::Network(e)) => {
                warn!("Network error on {}: {}", tweet_url, e);
                return FetchOutcome::retry(FailureReason::NetworkError(e));
            }
            Err(TransportError::Other(e)) => {
                warn!("Unexpected error for {}: {}", tweet_url, e);
                return FetchOutcome::retry(FailureReason::UnexpectedError(e));
            }
        };

        match response.status {
            200 => match serde_json::from_str(&response.body) {
                Ok(payload) => FetchOutcome::Success(payload),
                Err(e) => {
                    warn!("Undecodable body for {}: {}", tweet_url, e);
                    FetchOutcome::retry(FailureReason::UnexpectedError(e.to_string()))
                }
            },
            401 | 403 => {
                if let Err(e) = self.credentials.ensure_valid(tweet_url, response.status).await {
                    warn!("Token refresh failed: {}", e);
                }
                FetchOutcome::retry(FailureReason::AuthExpired)
            }
            429 => {
                let wait = rate_limit_wait(self.rate_limit_step, attempt);
                warn!("Rate limited for {}, waiting {:?}", tweet_url, wait);
                FetchOutcome::Retryable {
                    reason: FailureReason::RateLimited,
                    retry_after: Some(wait),
                }
            }
            status => {
                warn!(
                    "Non-200 ({}) for {}, attempt {}: {}",
                    status, tweet_url, attempt, response.body
                );
                FetchOutcome::retry(FailureReason::UnexpectedStatus(status))
            }
        }
    }
}
