use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Response header carrying the gateway request id.
pub const REQUEST_ID_HEADER: &str = "x-bkapi-request-id";
/// Response header carrying the gateway error code.
pub const ERROR_CODE_HEADER: &str = "x-bkapi-error-code";
/// Response header carrying the gateway error message.
pub const ERROR_MESSAGE_HEADER: &str = "x-bkapi-error-message";

/// Errors produced by body and result providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The data handed to a provider does not have the shape it requires.
    #[error("type not match: {provider} provider expects {expected}")]
    TypeNotMatch {
        provider: &'static str,
        expected: &'static str,
    },

    #[error("provider produced no result")]
    NoResult,

    #[error("json: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("form: {0}")]
    Form(#[source] Arc<serde_urlencoded::ser::Error>),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<serde_urlencoded::ser::Error> for ProviderError {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        Self::Form(Arc::new(err))
    }
}

/// A request the gateway rejected, signaled through response headers.
///
/// The HTTP exchange itself succeeded; the gateway refused the call before or
/// instead of reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gateway error: code={error_code}, message={error_message}, request_id={request_id}, status={status}")]
pub struct GatewayError {
    status: StatusCode,
    request_id: String,
    error_code: String,
    error_message: String,
}

impl GatewayError {
    /// Builds a gateway error from response headers.
    ///
    /// Returns `None` when the error-code header is absent, whatever the status.
    #[must_use]
    pub fn from_headers(status: StatusCode, headers: &HeaderMap) -> Option<Self> {
        let error_code = header_str(headers, ERROR_CODE_HEADER)?;
        Some(Self {
            status,
            request_id: header_str(headers, REQUEST_ID_HEADER).unwrap_or_default(),
            error_code,
            error_message: header_str(headers, ERROR_MESSAGE_HEADER).unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

#[must_use]
pub fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Errors returned by clients, operations and the public key cache.
///
/// Cloneable so that an operation can hand the same sticky failure back on
/// every call.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to apply {phase} options: {source}")]
    OptionApply {
        phase: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("operation {operation}: failed to serialize body data: {source}")]
    Serialization {
        operation: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("operation {operation}: failed to provide request body: {source}")]
    Body {
        operation: String,
        #[source]
        source: ProviderError,
    },

    #[error("operation {operation}: failed to provide result: {source}")]
    Result {
        operation: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Transport(Arc<reqwest::Error>),

    #[error(transparent)]
    Gateway(GatewayError),

    #[error("operation {operation} was cancelled")]
    Cancelled { operation: String },

    #[error("operation {operation}: blocking request inside a current-thread runtime, use `request().await`")]
    BlockingInAsync { operation: String },

    #[error("operation {operation} has already been requested")]
    AlreadyRequested { operation: String },

    /// A well-formed response whose envelope reports a failure.
    #[error("response error: code={code}, message={message}")]
    Response { code: i64, message: String },

    #[error("failed to fetch public key for {gateway}: {source}")]
    KeyFetch {
        gateway: String,
        #[source]
        source: Arc<Error>,
    },
}

impl Error {
    /// Returns the gateway error if the gateway rejected the call.
    #[must_use]
    pub fn as_gateway(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(err) => Some(err),
            Self::KeyFetch { source, .. } => source.as_gateway(),
            _ => None,
        }
    }

    /// Returns `true` for failures raised by the transport layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    #[must_use]
    pub fn invalid_header(name: impl Into<String>, reason: &impl ToString) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}
