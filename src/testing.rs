//! In-process fakes for the network and database boundaries.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use crate::api::{ApiResponse, TweetApi};
use crate::error::{CredentialError, StoreError, TransportError};
use crate::config::CrawlerConfig;
use crate::fetcher::{CookieIds, CredentialSource};
use crate::import::InputRows;
use crate::parser::TweetRecord;
use crate::store::{ItemStatus, TargetItem, TweetStore};

pub(crate) fn sample_tweet(id: &str) -> Value {
    json!({
        "data": {"tweetResult": {"result": {
            "__typename": "Tweet",
            "core": {"user_results": {"result": {
                "core": {"name": "Dan", "screen_name": "dandaneshvar"}
            }}},
            "views": {"count": "1234", "state": "EnabledWithCount"},
            "legacy": {
                "id_str": id,
                "created_at": "Thu Jun 29 13:00:00 +0000 2023",
                "full_text": "hello <a href=\"x\">world</a>\n link",
                "retweet_count": 4,
                "reply_count": 3,
                "favorite_count": 10,
                "quote_count": 2,
                "bookmark_count": 1
            }
        }}}
    })
}

pub(crate) struct FakeSource {
    pub(crate) activations: AtomicUsize,
    pub(crate) scrapes: AtomicUsize,
    token: Mutex<String>,
    marketing: Option<String>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
}

impl FakeSource {
    pub(crate) fn new(token: &str, marketing: Option<&str>) -> Self {
        Self {
            activations: AtomicUsize::new(0),
            scrapes: AtomicUsize::new(0),
            token: Mutex::new(token.to_string()),
            marketing: marketing.map(str::to_string),
            fail: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_string();
    }

    pub(crate) fn set_activation_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_activation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialSource for FakeSource {
    async fn activate_guest_token(&self) -> Result<String, CredentialError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(CredentialError::MissingGuestToken);
        }
        Ok(self.token.lock().unwrap().clone())
    }

    async fn scrape_cookies(&self, _seed_url: &str) -> CookieIds {
        self.scrapes.fetch_add(1, Ordering::SeqCst);
        CookieIds {
            guest_id_marketing: self.marketing.clone(),
            guest_id_ads: None,
            personalization_id: None,
        }
    }
}

type Scripted = Result<(u16, String), TransportError>;

/// Replays scripted responses, then repeats `fallback` forever.
pub(crate) struct FakeApi {
    pub(crate) calls: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    latency: Duration,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    requested: Mutex<Vec<String>>,
    guest_tokens: Mutex<Vec<String>>,
    by_id: Mutex<HashMap<String, (u16, String)>>,
}

impl FakeApi {
    fn build(script: Vec<Scripted>, fallback: Option<Scripted>, latency: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            latency,
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            requested: Mutex::new(Vec::new()),
            guest_tokens: Mutex::new(Vec::new()),
            by_id: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn always(status: u16, body: String) -> Self {
        Self::build(Vec::new(), Some(Ok((status, body))), Duration::ZERO)
    }

    pub(crate) fn failing(error: TransportError) -> Self {
        Self::build(Vec::new(), Some(Err(error)), Duration::ZERO)
    }

    pub(crate) fn scripted(script: Vec<Scripted>) -> Self {
        Self::build(script, None, Duration::ZERO)
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answers `sample_tweet(id)` for every id after `latency`.
    pub(crate) fn echo(latency: Duration) -> Self {
        Self::build(Vec::new(), None, latency)
    }

    /// Fixed answer for one tweet id, taking precedence over everything else.
    pub(crate) fn respond_for(&self, id: &str, status: u16, body: String) {
        self.by_id
            .lock()
            .unwrap()
            .insert(id.to_string(), (status, body));
    }

    pub(crate) fn requested_ids(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub(crate) fn last_guest_token(&self) -> Option<String> {
        self.guest_tokens.lock().unwrap().last().cloned()
    }

    fn next_response(&self, tweet_id: &str) -> Scripted {
        if let Some(fixed) = self.by_id.lock().unwrap().get(tweet_id) {
            return Ok(fixed.clone());
        }
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &*self.fallback.lock().unwrap() {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(TransportError::Network(e))) => Err(TransportError::Network(e.clone())),
            Some(Err(TransportError::Other(e))) => Err(TransportError::Other(e.clone())),
            None => Ok((200, sample_tweet(tweet_id).to_string())),
        }
    }
}

#[async_trait]
impl TweetApi for FakeApi {
    async fn get_tweet(
        &self,
        tweet_id: &str,
        headers: HeaderMap,
    ) -> Result<ApiResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.requested.lock().unwrap().push(tweet_id.to_string());
        if let Some(token) = headers.get("x-guest-token").and_then(|v| v.to_str().ok()) {
            self.guest_tokens.lock().unwrap().push(token.to_string());
        }
        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_response(tweet_id)
            .map(|(status, body)| ApiResponse { status, body })
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) statuses: Mutex<HashMap<String, ItemStatus>>,
    pub(crate) results: Mutex<HashMap<String, (TweetRecord, Value)>>,
    pub(crate) tables: Mutex<Vec<String>>,
    order: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub(crate) fn with_pending(urls: &[&str]) -> Self {
        let store = Self::default();
        for url in urls {
            store
                .statuses
                .lock()
                .unwrap()
                .insert(url.to_string(), ItemStatus::Pending);
            store.order.lock().unwrap().push(url.to_string());
        }
        store
    }

    pub(crate) fn status(&self, url: &str) -> Option<ItemStatus> {
        self.statuses.lock().unwrap().get(url).copied()
    }
}

#[async_trait]
impl TweetStore for MemoryStore {
    async fn ensure_output_table(&self, output_table: &str) -> Result<(), StoreError> {
        self.tables.lock().unwrap().push(output_table.to_string());
        Ok(())
    }

    async fn fetch_pending(&self, _input_table: &str) -> Result<Vec<TargetItem>, StoreError> {
        let statuses = self.statuses.lock().unwrap();
        Ok(self
            .order
            .lock()
            .unwrap()
            .iter()
            .filter(|url| statuses.get(*url) == Some(&ItemStatus::Pending))
            .map(|url| TargetItem {
                url: url.clone(),
                status: ItemStatus::Pending,
            })
            .collect())
    }

    async fn update_status(
        &self,
        _input_table: &str,
        url: &str,
        status: ItemStatus,
    ) -> Result<(), StoreError> {
        self.statuses
            .lock()
            .unwrap()
            .insert(url.to_string(), status);
        Ok(())
    }

    async fn insert_result(
        &self,
        _output_table: &str,
        url: &str,
        record: &TweetRecord,
        raw: &Value,
    ) -> Result<(), StoreError> {
        self.results
            .lock()
            .unwrap()
            .insert(url.to_string(), (record.clone(), raw.clone()));
        Ok(())
    }

    async fn load_input(&self, _input_table: &str, input: &InputRows) -> Result<u64, StoreError> {
        let url_column = CrawlerConfig::default().url_column;
        let position = |name: &str| input.columns.iter().position(|column| column == name);
        let (Some(url_index), Some(status_index)) = (position(&url_column), position("status"))
        else {
            return Ok(0);
        };

        let all = [
            ItemStatus::Pending,
            ItemStatus::Done,
            ItemStatus::Error,
            ItemStatus::ParseFailed,
            ItemStatus::InvalidUrl,
        ];
        let mut loaded = 0;
        for row in &input.rows {
            let Some(status) = all.into_iter().find(|s| s.as_str() == row[status_index]) else {
                continue;
            };
            self.statuses
                .lock()
                .unwrap()
                .insert(row[url_index].clone(), status);
            self.order.lock().unwrap().push(row[url_index].clone());
            loaded += 1;
        }
        Ok(loaded)
    }
}
