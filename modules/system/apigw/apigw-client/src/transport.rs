use std::time::Duration;

use crate::error::Error;

/// Sends fully built requests.
///
/// The default implementation wraps a shared [`reqwest::Client`]; tests and
/// callers with special networking needs can plug in their own.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response head with an unread body.
    ///
    /// # Errors
    /// Returns `Error::Transport` for network, DNS, TLS or timeout failures.
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, Error>;
}

/// Transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Create a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the underlying client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, Error> {
        Ok(self.http_client.execute(request).await?)
    }
}
