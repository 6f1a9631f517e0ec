use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, ORIGIN,
    REFERER, USER_AGENT,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::CredentialError;
use crate::fetcher::{CookieIds, CredentialSource, BROWSER_UA};

/// Statuses that mean the guest credentials are no longer accepted.
pub(crate) const AUTH_FAILURE_CODES: [u16; 3] = [401, 403, 429];

#[derive(Clone, Debug, Default)]
pub(crate) struct CredentialBundle {
    pub(crate) guest_token: Option<String>,
    pub(crate) guest_id_marketing: Option<String>,
    pub(crate) guest_id_ads: Option<String>,
    pub(crate) personalization_id: Option<String>,
    pub(crate) last_refresh: Option<Instant>,
}

impl CredentialBundle {
    fn usable(&self) -> Option<(&str, &str)> {
        Some((self.guest_token.as_deref()?, self.guest_id_marketing.as_deref()?))
    }

    fn cookie_header(&self, token: &str, marketing: &str) -> String {
        let ads = self.guest_id_ads.as_deref().unwrap_or(marketing);
        let mut cookie = format!(
            "guest_id_marketing={marketing}; guest_id_ads={ads}; guest_id={marketing}; gt={token}"
        );
        if let Some(personalization) = &self.personalization_id {
            cookie.push_str(&format!("; personalization_id=\"{personalization}\""));
        }
        cookie
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CredentialState {
    Uninitialized,
    Refreshing,
    Valid,
}

struct Shared {
    bundle: CredentialBundle,
    state: CredentialState,
}

/// Owns the guest credential bundle shared by every fetch worker.
///
/// Refreshes are serialized through `refresh_gate`, which also remembers when
/// the last refresh finished so that a burst of auth failures triggers only one
/// activation per `min_refresh_interval`. `headers` never waits on the gate and
/// reads the last stored snapshot.
pub(crate) struct CredentialManager {
    bearer_token: String,
    source: Arc<dyn CredentialSource>,
    min_refresh_interval: Duration,
    shared: RwLock<Shared>,
    refresh_gate: Mutex<Option<Instant>>,
}

impl CredentialManager {
    pub(crate) fn new(
        bearer_token: String,
        source: Arc<dyn CredentialSource>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            bearer_token,
            source,
            min_refresh_interval,
            shared: RwLock::new(Shared {
                bundle: CredentialBundle::default(),
                state: CredentialState::Uninitialized,
            }),
            refresh_gate: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> CredentialState {
        self.shared.read().unwrap_or_else(PoisonError::into_inner).state
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> CredentialBundle {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bundle
            .clone()
    }

    fn set_state(&self, state: CredentialState) {
        self.shared.write().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    /// Fetches a new guest token and cookie ids, seeding the cookie scrape
    /// with `seed_url`. Returns `Ok(false)` when the interval guard skipped
    /// the refresh.
    pub(crate) async fn refresh(&self, seed_url: &str) -> Result<bool, CredentialError> {
        let mut last_refresh = self.refresh_gate.lock().await;
        if let Some(finished) = *last_refresh {
            if finished.elapsed() < self.min_refresh_interval {
                let last_success = self
                    .shared
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .bundle
                    .last_refresh;
                debug!(
                    "Skipping token refresh, last attempt finished {:?} ago, last success at {:?}",
                    finished.elapsed(),
                    last_success
                );
                return Ok(false);
            }
        }

        let result = self.rotate(seed_url).await;
        // Stamped on completion so callers queued behind a slow refresh see it
        // as recent.
        *last_refresh = Some(Instant::now());
        result.map(|()| true)
    }

    async fn rotate(&self, seed_url: &str) -> Result<(), CredentialError> {
        info!("Refreshing tokens...");
        self.set_state(CredentialState::Refreshing);

        let guest_token = match self.source.activate_guest_token().await {
            Ok(token) => token,
            Err(e) => {
                let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
                shared.bundle.guest_token = None;
                shared.state = CredentialState::Uninitialized;
                return Err(e);
            }
        };
        let CookieIds {
            guest_id_marketing,
            guest_id_ads,
            personalization_id,
        } = self.source.scrape_cookies(seed_url).await;

        let bundle = CredentialBundle {
            guest_token: Some(guest_token),
            guest_id_marketing,
            guest_id_ads,
            personalization_id,
            last_refresh: Some(Instant::now()),
        };
        let state = if bundle.usable().is_some() {
            CredentialState::Valid
        } else {
            warn!("Refresh finished without guest_id_marketing, credentials unusable");
            CredentialState::Uninitialized
        };
        debug!(
            "Guest token: {:?}, guest id marketing: {:?}, personalization id: {:?}",
            bundle.guest_token, bundle.guest_id_marketing, bundle.personalization_id
        );

        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.bundle = bundle;
        shared.state = state;
        info!("Tokens refreshed");
        Ok(())
    }

    /// Materializes request headers from the current bundle.
    pub(crate) fn headers(&self) -> Result<HeaderMap, CredentialError> {
        let shared = self.shared.read().unwrap_or_else(PoisonError::into_inner);
        let bundle = &shared.bundle;
        let (token, marketing) = bundle.usable().ok_or(CredentialError::NotInitialized)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.bearer_token))?,
        );
        headers.insert(
            HeaderName::from_static("x-guest-token"),
            HeaderValue::from_str(token)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&bundle.cookie_header(token, marketing))?,
        );
        headers.insert(ORIGIN, HeaderValue::from_static("https://x.com"));
        headers.insert(
            HeaderName::from_static("priority"),
            HeaderValue::from_static("u=1, i"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://x.com/"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        Ok(headers)
    }

    /// Refreshes when `observed_status` is an auth failure, otherwise no-op.
    pub(crate) async fn ensure_valid(
        &self,
        seed_url: &str,
        observed_status: u16,
    ) -> Result<bool, CredentialError> {
        if !AUTH_FAILURE_CODES.contains(&observed_status) {
            return Ok(false);
        }
        warn!("Response status {}, refreshing tokens...", observed_status);
        self.refresh(seed_url).await
    }
}
