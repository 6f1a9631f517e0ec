use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::CredentialError;
use crate::proxy::HttpClients;
use crate::retry::random_delay;

const ACTIVATE_URL: &str = "https://api.twitter.com/1.1/guest/activate.json";
pub(crate) const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

static MARKETING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"guest_id_marketing=([^";]+)"#).unwrap());
static ADS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"guest_id_ads=([^";]+)"#).unwrap());
static PERSONALIZATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"personalization_id\\?=\\?"?([^"\\;]+)"#).unwrap());
static SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").unwrap());

/// Identifiers scraped from the cookies a post page sets inline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CookieIds {
    pub(crate) guest_id_marketing: Option<String>,
    pub(crate) guest_id_ads: Option<String>,
    pub(crate) personalization_id: Option<String>,
}

/// The two network calls behind a credential refresh.
#[async_trait]
pub(crate) trait CredentialSource: Send + Sync {
    /// Obtains a fresh guest token. Failure aborts the refresh.
    async fn activate_guest_token(&self) -> Result<String, CredentialError>;

    /// Scrapes cookie identifiers from `seed_url`. Best effort: any failure
    /// yields absent fields.
    async fn scrape_cookies(&self, seed_url: &str) -> CookieIds;
}

pub(crate) struct HttpCredentialFetcher {
    clients: Arc<HttpClients>,
    bearer_token: String,
    activate_url: String,
    scrape_jitter: (Duration, Duration),
}

impl HttpCredentialFetcher {
    pub(crate) fn new(
        clients: Arc<HttpClients>,
        bearer_token: String,
        scrape_jitter: (Duration, Duration),
    ) -> Self {
        Self {
            clients,
            bearer_token,
            activate_url: ACTIVATE_URL.to_string(),
            scrape_jitter,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_activate_url(mut self, activate_url: String) -> Self {
        self.activate_url = activate_url;
        self
    }

    async fn fetch_page(&self, seed_url: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self
            .clients
            .next()?
            .get(seed_url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header("priority", "u=0, i")
            .header("upgrade-insecure-requests", "1")
            .header(USER_AGENT, BROWSER_UA)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Failed to fetch cookie data (status {})", status);
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialFetcher {
    async fn activate_guest_token(&self) -> Result<String, CredentialError> {
        let response = self
            .clients
            .next()?
            .post(&self.activate_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer_token))
            .header(USER_AGENT, BROWSER_UA)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::ActivationStatus(status.as_u16()));
        }

        let body: Value = response.json().await?;
        guest_token_from(&body).ok_or(CredentialError::MissingGuestToken)
    }

    async fn scrape_cookies(&self, seed_url: &str) -> CookieIds {
        tokio::time::sleep(random_delay(self.scrape_jitter)).await;

        match self.fetch_page(seed_url).await {
            Ok(Some(page)) => {
                let ids = extract_cookie_ids(&page);
                debug!("Scraped cookie ids from {}: {:?}", seed_url, ids);
                ids
            }
            Ok(None) => CookieIds::default(),
            Err(e) => {
                warn!("Cookie fetch issue for {}: {}", seed_url, e);
                CookieIds::default()
            }
        }
    }
}

fn guest_token_from(body: &Value) -> Option<String> {
    match body.get("guest_token")? {
        Value::String(token) if !token.is_empty() => Some(token.clone()),
        Value::Number(token) => Some(token.to_string()),
        _ => None,
    }
}

/// Runs the three cookie patterns over every inline script of `page`.
/// A later script overrides an earlier match; unmatched fields stay `None`.
pub(crate) fn extract_cookie_ids(page: &str) -> CookieIds {
    let document = Html::parse_document(page);
    let mut ids = CookieIds::default();

    for script in document.select(&SCRIPT) {
        let text = script.text().collect::<String>();
        if text.is_empty() {
            continue;
        }
        if let Some(m) = MARKETING_RE.captures(&text) {
            ids.guest_id_marketing = Some(m[1].to_string());
        }
        if let Some(m) = ADS_RE.captures(&text) {
            ids.guest_id_ads = Some(m[1].to_string());
        }
        if let Some(m) = PERSONALIZATION_RE.captures(&text) {
            ids.personalization_id = Some(m[1].to_string());
        }
    }
    ids
}
