use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, GatewayError, ProviderError, REQUEST_ID_HEADER, header_str};

/// A fully drained HTTP response.
///
/// Operations read the whole body before post-processing, so the connection
/// is always released no matter how the call ends.
#[derive(Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.len())
            .finish()
    }
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Drain a transport response.
    ///
    /// # Errors
    /// Returns `Error::Transport` if reading the body fails.
    pub async fn read(response: reqwest::Response) -> Result<Self, Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self::new(status, headers, body))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Gateway request id, if the gateway reported one.
    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        header_str(&self.headers, REQUEST_ID_HEADER)
    }

    /// Gateway rejection signaled in the headers, if any.
    #[must_use]
    pub fn gateway_error(&self) -> Option<GatewayError> {
        GatewayError::from_headers(self.status, &self.headers)
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns `ProviderError::Json` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
