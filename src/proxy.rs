use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Proxy};

/// Source of the proxy to use for the next outgoing request.
pub(crate) trait ProxyProvider: Send + Sync {
    fn current_proxy(&self) -> Option<String>;
}

/// Always hands out the same proxy, or none.
pub(crate) struct StaticProxy {
    proxy: Option<String>,
}

impl StaticProxy {
    pub(crate) fn new(proxy: Option<String>) -> Self {
        Self { proxy }
    }
}

impl ProxyProvider for StaticProxy {
    fn current_proxy(&self) -> Option<String> {
        self.proxy.clone()
    }
}

/// Shared HTTP clients. reqwest binds proxies per client, so one client is
/// kept per proxy URL and reused; requests without a proxy use `direct`.
pub(crate) struct HttpClients {
    direct: Client,
    timeout: Duration,
    provider: Arc<dyn ProxyProvider>,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpClients {
    pub(crate) fn new(
        timeout: Duration,
        provider: Arc<dyn ProxyProvider>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            // Proxies come only from the provider, never from the environment.
            direct: Client::builder().timeout(timeout).no_proxy().build()?,
            timeout,
            provider,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// Client for the next network call, consulting the proxy provider once.
    pub(crate) fn next(&self) -> Result<Client, reqwest::Error> {
        let Some(proxy) = self.provider.current_proxy() else {
            return Ok(self.direct.clone());
        };

        let mut cache = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = cache.get(&proxy) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .proxy(Proxy::all(&proxy)?)
            .build()?;
        cache.insert(proxy, client.clone());
        Ok(client)
    }
}
