use thiserror::Error;

/// Failures while provisioning or materializing guest credentials.
#[derive(Debug, Error)]
pub(crate) enum CredentialError {
    #[error("guest token activation failed: {0}")]
    Activation(#[from] reqwest::Error),
    #[error("guest token activation returned status {0}")]
    ActivationStatus(u16),
    #[error("activation response did not contain a guest_token")]
    MissingGuestToken,
    #[error("credentials not initialized, refresh first")]
    NotInitialized,
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

#[derive(Debug, Error)]
pub(crate) enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV has no {0:?} column")]
    MissingColumn(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid proxy url {0:?}: {1}")]
    Proxy(String, reqwest::Error),
}

/// Top-level error for a crawl run. Per-item failures never reach this.
#[derive(Debug, Error)]
pub(crate) enum CrawlerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure to get any HTTP response for a tweet request.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            TransportError::Network(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}
