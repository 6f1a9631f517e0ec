use std::time::Duration;

use log::warn;
use rand::Rng;
use serde_json::Value;

use crate::parser::{parse_tweet, TweetRecord};
use crate::store::ItemStatus;
use crate::worker::{FailureReason, FetchOutcome, FetchWorker};

/// Uniform random duration in `[lo, hi)`; `lo` when the range is empty.
pub(crate) fn random_delay((lo, hi): (Duration, Duration)) -> Duration {
    if hi <= lo {
        return lo;
    }
    rand::rng().random_range(lo..hi)
}

#[derive(Clone, Debug)]
pub(crate) struct RetryPolicy {
    /// Total attempts per URL, including the first.
    pub(crate) max_attempts: u32,
    pub(crate) backoff_base: Duration,
    /// Ceiling for a single backoff, jitter included.
    pub(crate) max_backoff: Duration,
}

impl RetryPolicy {
    /// `base * 2^attempt` scaled by a random factor in `[0.5, 1.5)`, never
    /// more than `max_backoff`.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .backoff_base
            .saturating_mul(multiplier)
            .min(self.max_backoff);
        delay
            .mul_f64(rand::rng().random_range(0.5..1.5))
            .min(self.max_backoff)
    }
}

/// Terminal result for one URL, ready to be written back.
#[derive(Debug)]
pub(crate) struct ItemResult {
    pub(crate) url: String,
    pub(crate) status: ItemStatus,
    pub(crate) record: Option<TweetRecord>,
    pub(crate) raw: Option<Value>,
    pub(crate) attempts: u32,
}

/// Drives a [`FetchWorker`] until success or the attempt budget runs out.
pub(crate) struct RetryOrchestrator {
    worker: FetchWorker,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub(crate) fn new(worker: FetchWorker, policy: RetryPolicy) -> Self {
        Self { worker, policy }
    }

    /// Returns either `Success` or `TerminalFailure`, with the attempt count.
    pub(crate) async fn fetch(&self, tweet_url: &str) -> (FetchOutcome, u32) {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            match self.worker.attempt(tweet_url, attempt).await {
                FetchOutcome::Retryable {
                    reason,
                    retry_after,
                } => {
                    warn!("{} for {}, attempt {}/{}", reason, tweet_url, attempt, max);
                    if attempt == max {
                        break;
                    }
                    let wait = retry_after.unwrap_or_else(|| self.policy.backoff(attempt));
                    tokio::time::sleep(wait).await;
                }
                terminal => return (terminal, attempt),
            }
        }
        warn!("Failed to fetch after {} attempts: {}", max, tweet_url);
        (
            FetchOutcome::TerminalFailure(FailureReason::ExhaustedRetries),
            max,
        )
    }

    /// Fetches and parses `tweet_url`. Never fails; every path ends in a
    /// terminal [`ItemStatus`].
    pub(crate) async fn process(&self, tweet_url: &str) -> ItemResult {
        let (outcome, attempts) = self.fetch(tweet_url).await;
        let (status, record, raw) = match outcome {
            FetchOutcome::Success(raw) => match parse_tweet(&raw) {
                Some(record) => (ItemStatus::Done, Some(record), Some(raw)),
                None => {
                    warn!("No valid data parsed for {}", tweet_url);
                    (ItemStatus::ParseFailed, None, Some(raw))
                }
            },
            FetchOutcome::TerminalFailure(FailureReason::InvalidUrl) => {
                (ItemStatus::InvalidUrl, None, None)
            }
            FetchOutcome::TerminalFailure(_) | FetchOutcome::Retryable { .. } => {
                (ItemStatus::Error, None, None)
            }
        };

        ItemResult {
            url: tweet_url.to_string(),
            status,
            record,
            raw,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialManager;
    use crate::testing::{sample_tweet, FakeApi, FakeSource};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::time::Instant;

    const URL: &str = "https://x.com/someone/status/1674395155892260865";

    fn orchestrator(api: Arc<FakeApi>) -> RetryOrchestrator {
        let credentials = Arc::new(CredentialManager::new(
            "bearer".to_string(),
            Arc::new(FakeSource::new("t", Some("m"))),
            Duration::from_secs(10),
        ));
        let worker = FetchWorker::new(
            api,
            credentials,
            (Duration::from_millis(500), Duration::from_millis(1500)),
            Duration::from_secs(15),
        );
        RetryOrchestrator::new(
            worker,
            RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_secs(1),
                max_backoff: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn backoff_is_exponential_with_bounded_jitter() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        };
        for attempt in 1..=4 {
            let nominal = Duration::from_secs(1 << attempt);
            let delay = policy.backoff(attempt);
            assert!(delay >= nominal.mul_f64(0.5), "{delay:?} at {attempt}");
            assert!(delay < nominal.mul_f64(1.5), "{delay:?} at {attempt}");
        }
    }

    #[test]
    fn backoff_never_exceeds_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 40,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        };
        for attempt in [5, 10, 20, 31, 32, 40] {
            let delay = policy.backoff(attempt);
            assert!(delay <= Duration::from_secs(30), "{delay:?} at {attempt}");
            assert!(delay >= Duration::from_secs(15), "{delay:?} at {attempt}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn long_retry_budget_stays_within_ceiling() {
        let api = Arc::new(FakeApi::always(500, String::new()));
        let credentials = Arc::new(CredentialManager::new(
            "bearer".to_string(),
            Arc::new(FakeSource::new("t", Some("m"))),
            Duration::from_secs(10),
        ));
        let worker = FetchWorker::new(
            api.clone(),
            credentials,
            (Duration::ZERO, Duration::ZERO),
            Duration::from_secs(15),
        );
        let orchestrator = RetryOrchestrator::new(
            worker,
            RetryPolicy {
                max_attempts: 20,
                backoff_base: Duration::from_secs(1),
                max_backoff: Duration::from_secs(30),
            },
        );

        let started = Instant::now();
        let result = orchestrator.process(URL).await;

        assert_eq!(result.status, ItemStatus::Error);
        assert_eq!(api.calls.load(Ordering::SeqCst), 20);
        assert!(started.elapsed() <= Duration::from_secs(19 * 30));
    }

    #[test]
    fn random_delay_stays_in_range() {
        let range = (Duration::from_millis(500), Duration::from_millis(1500));
        for _ in 0..100 {
            let delay = random_delay(range);
            assert!(delay >= range.0 && delay < range.1);
        }
        assert_eq!(random_delay((Duration::ZERO, Duration::ZERO)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_is_attempted_exactly_max_times() {
        let api = Arc::new(FakeApi::always(500, String::new()));
        let result = orchestrator(api.clone()).process(URL).await;

        assert_eq!(result.status, ItemStatus::Error);
        assert_eq!(result.attempts, 3);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_before_retrying() {
        let api = Arc::new(FakeApi::scripted(vec![
            Ok((429, String::new())),
            Ok((200, sample_tweet("1674395155892260865").to_string())),
        ]));
        let started = Instant::now();
        let result = orchestrator(api.clone()).process(URL).await;

        assert_eq!(result.status, ItemStatus::Done);
        assert_eq!(result.attempts, 2);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(result.record.unwrap().tweet_id, "1674395155892260865");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_every_time_stays_bounded() {
        let api = Arc::new(FakeApi::always(429, String::new()));
        let result = orchestrator(api.clone()).process(URL).await;

        assert_eq!(result.status, ItemStatus::Error);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_payload_is_parse_failed_without_retry() {
        let api = Arc::new(FakeApi::always(200, json!({"data": {}}).to_string()));
        let result = orchestrator(api.clone()).process(URL).await;

        assert_eq!(result.status, ItemStatus::ParseFailed);
        assert_eq!(result.attempts, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(result.raw.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_is_not_retried() {
        let api = Arc::new(FakeApi::always(200, String::new()));
        let result = orchestrator(api.clone()).process("https://x.com").await;

        assert_eq!(result.status, ItemStatus::InvalidUrl);
        assert_eq!(result.attempts, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }
}
