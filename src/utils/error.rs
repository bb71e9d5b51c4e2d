use crate::pool::RouteKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyPoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Connection pool service is already initialized")]
    AlreadyInitialized,

    #[error("Failed to construct connection manager: {0}")]
    Fatal(String),

    #[error("Timed out waiting for a connection to {0}")]
    LeaseTimeout(RouteKey),

    #[error("Failed to connect to {route}: {source}")]
    Connect {
        route: RouteKey,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProxyPoolError {
    pub(crate) fn pool_shut_down() -> Self {
        Self::ServiceUnavailable("connection manager has been shut down".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyPoolError>;
