use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::RuntimeFlavor;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use url::Url;

use crate::error::{Error, ProviderError};
use crate::options::SharedOption;
use crate::provider::{BodyProvider, JsonResultProvider, ResultProvider, ResultSlot, ResultTarget};
use crate::response::Response;
use crate::template::replace_placeholders;
use crate::transport::Transport;

/// Static description of one gateway resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationConfig {
    pub name: Cow<'static, str>,
    pub method: Method,
    pub path: Cow<'static, str>,
}

impl OperationConfig {
    #[must_use]
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        method: Method,
        path: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
        }
    }

    /// Usable in `const` resource tables.
    #[must_use]
    pub const fn from_static(name: &'static str, method: Method, path: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            method,
            path: Cow::Borrowed(path),
        }
    }

    /// The configured name, or `(METHOD PATH)` when it is empty.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("({} {})", self.method, self.path)
        } else {
            self.name.to_string()
        }
    }
}

/// What response hooks get to see.
#[derive(Debug)]
pub struct ResponseEvent<'a> {
    pub operation: &'a str,
    pub method: &'a Method,
    pub url: &'a Url,
    pub response: &'a Response,
    pub elapsed: Duration,
}

pub type ResponseHook = Arc<dyn Fn(&ResponseEvent<'_>) + Send + Sync>;

type PathRewrite = Box<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug)]
enum State {
    Building,
    Sent,
    Failed(Error),
}

/// One executable gateway call.
///
/// Created by [`Client::new_operation`](crate::Client::new_operation),
/// configured through setters or options, then executed once with
/// [`request`](Self::request). The first configuration failure is sticky: it
/// stops further option application and is returned by every `request` call
/// without touching the network.
pub struct Operation {
    name: String,
    method: Method,
    base_url: String,
    path: String,
    path_rewrites: Vec<PathRewrite>,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Value>,
    body_provider: Option<Arc<dyn BodyProvider>>,
    result: Option<Arc<dyn ResultTarget>>,
    result_provider: Option<Arc<dyn ResultProvider>>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    response_hooks: Vec<ResponseHook>,
    transport: Arc<dyn Transport>,
    span: Span,
    state: State,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("path_rewrites", &self.path_rewrites.len())
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("body", &self.body.is_some())
            .field("body_provider", &self.body_provider.is_some())
            .field("result", &self.result.is_some())
            .field("result_provider", &self.result_provider.is_some())
            .field("timeout", &self.timeout)
            .field("cancellation", &self.cancellation)
            .field("response_hooks", &self.response_hooks.len())
            .field("transport", &"..")
            .field("span", &self.span)
            .field("state", &self.state)
            .finish()
    }
}

impl Operation {
    /// Usually created through [`Client::new_operation`](crate::Client::new_operation),
    /// which supplies the client's base URL, headers, transport and span.
    #[must_use]
    pub fn new(
        config: &OperationConfig,
        base_url: &str,
        headers: HeaderMap,
        transport: Arc<dyn Transport>,
        span: Span,
    ) -> Self {
        Self {
            name: config.display_name(),
            method: config.method.clone(),
            base_url: base_url.to_owned(),
            path: config.path.to_string(),
            path_rewrites: Vec::new(),
            headers,
            query: Vec::new(),
            body: None,
            body_provider: None,
            result: None,
            result_provider: None,
            timeout: None,
            cancellation: None,
            response_hooks: Vec::new(),
            transport,
            span,
            state: State::Building,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The sticky configuration error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match &self.state {
            State::Failed(err) => Some(err),
            State::Building | State::Sent => None,
        }
    }

    /// Record a configuration failure. Only the first one is kept.
    pub fn record_error(&mut self, err: Error) -> &mut Self {
        if matches!(self.state, State::Building) {
            tracing::debug!(parent: &self.span, operation = %self.name, error = %err, "operation failed while building");
            self.state = State::Failed(err);
        }
        self
    }

    /// Apply `options` in order, stopping at the first failure.
    pub fn apply(&mut self, options: &[SharedOption]) -> &mut Self {
        for option in options {
            if self.error().is_some() {
                break;
            }
            if let Err(err) = option.apply_to_operation(self) {
                self.record_error(err);
            }
        }
        self
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a header; an invalid name or value becomes the sticky error.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        let header_name = match HeaderName::try_from(name) {
            Ok(header_name) => header_name,
            Err(e) => return self.record_error(Error::invalid_header(name, &e)),
        };
        match HeaderValue::try_from(value) {
            Ok(header_value) => self.insert_header(header_name, header_value),
            Err(e) => self.record_error(Error::invalid_header(name, &e)),
        }
    }

    pub fn set_headers<'a>(&mut self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> &mut Self {
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    pub fn set_query_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn set_query_params(&mut self, params: impl IntoIterator<Item = (String, String)>) -> &mut Self {
        self.query.extend(params);
        self
    }

    /// Register a path rewrite for send time.
    ///
    /// Rewrites run in registration order, each one seeing the path produced
    /// by the previous ones, so several parameter sets compose.
    pub fn set_path_params<S>(&mut self, params: HashMap<String, String, S>) -> &mut Self
    where
        S: BuildHasher + Send + Sync + 'static,
    {
        self.path_rewrites
            .push(Box::new(move |path| replace_placeholders(path, &params)));
        self
    }

    /// Serialize `data` as the body data; a failure becomes the sticky error.
    pub fn set_body<T: Serialize + ?Sized>(&mut self, data: &T) -> &mut Self {
        match serde_json::to_value(data) {
            Ok(value) => self.set_body_value(value),
            Err(e) => {
                let operation = self.name.clone();
                self.record_error(Error::Serialization {
                    operation,
                    source: Arc::new(e),
                })
            }
        }
    }

    pub fn set_body_value(&mut self, value: Value) -> &mut Self {
        self.body = Some(value);
        self
    }

    pub fn set_body_provider(&mut self, provider: Arc<dyn BodyProvider>) -> &mut Self {
        self.body_provider = Some(provider);
        self
    }

    pub fn set_result(&mut self, target: Arc<dyn ResultTarget>) -> &mut Self {
        self.result = Some(target);
        self
    }

    pub fn set_result_provider(&mut self, provider: Arc<dyn ResultProvider>) -> &mut Self {
        self.result_provider = Some(provider);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) -> &mut Self {
        self.cancellation = Some(token);
        self
    }

    pub fn on_response(&mut self, hook: ResponseHook) -> &mut Self {
        self.response_hooks.push(hook);
        self
    }

    /// Full URL as it will be sent, with path rewrites and query applied.
    ///
    /// # Errors
    /// Returns `Error::InvalidUrl` if the result is not a valid URL.
    pub fn url(&self) -> Result<Url, Error> {
        let path = self
            .path_rewrites
            .iter()
            .fold(self.path.clone(), |path, rewrite| rewrite(&path));
        let raw = join_url(&self.base_url, &path);
        let mut url = Url::parse(&raw).map_err(|e| Error::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    fn build_request(&self) -> Result<reqwest::Request, Error> {
        let mut request = reqwest::Request::new(self.method.clone(), self.url()?);
        *request.headers_mut() = self.headers.clone();
        *request.timeout_mut() = self.timeout;

        match &self.body_provider {
            Some(provider) => {
                let encoded = provider
                    .provide_body(self.body.as_ref())
                    .map_err(|source| Error::Body {
                        operation: self.name.clone(),
                        source,
                    })?;
                if let Some(encoded) = encoded {
                    let headers = request.headers_mut();
                    headers.insert(CONTENT_TYPE, encoded.content_type.clone());
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.content_length()));
                    *request.body_mut() = Some(encoded.bytes.into());
                }
            }
            None if self.body.is_some() => {
                tracing::warn!(parent: &self.span, operation = %self.name, "body data set without a body provider, sending without body");
            }
            None => {}
        }
        Ok(request)
    }

    /// Execute the call.
    ///
    /// The response body is always read to the end. A response carrying a
    /// gateway error code fails with `Error::Gateway` whatever its status, and
    /// the result target is left untouched.
    ///
    /// # Errors
    /// - the sticky configuration error, again on every call
    /// - `Error::Body` if the body provider fails (becomes sticky)
    /// - `Error::Transport` / `Error::Cancelled` from the exchange itself
    /// - `Error::Gateway` when the gateway rejected the call
    /// - `Error::Result` when the result provider fails
    /// - `Error::AlreadyRequested` once the request has been sent
    pub async fn request(&mut self) -> Result<Response, Error> {
        match &self.state {
            State::Failed(err) => return Err(err.clone()),
            State::Sent => {
                return Err(Error::AlreadyRequested {
                    operation: self.name.clone(),
                });
            }
            State::Building => {}
        }

        let request = match self.build_request() {
            Ok(request) => request,
            Err(err) => {
                self.record_error(err.clone());
                return Err(err);
            }
        };
        self.state = State::Sent;

        let url = request.url().clone();
        tracing::debug!(parent: &self.span, operation = %self.name, method = %self.method, url = %url, "sending request");

        let started = Instant::now();
        let response = match self.exchange(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    parent: &self.span,
                    operation = %self.name,
                    method = %self.method,
                    url = %url,
                    error = %err,
                    "request failed"
                );
                return Err(err);
            }
        };

        let event = ResponseEvent {
            operation: &self.name,
            method: &self.method,
            url: &url,
            response: &response,
            elapsed: started.elapsed(),
        };
        for hook in &self.response_hooks {
            self.span.in_scope(|| hook(&event));
        }

        if let Some(err) = response.gateway_error() {
            return Err(Error::Gateway(err));
        }

        if let Some(provider) = &self.result_provider {
            provider
                .provide_result(&response, self.result.as_deref())
                .map_err(|source| Error::Result {
                    operation: self.name.clone(),
                    source,
                })?;
        }
        Ok(response)
    }

    async fn exchange(&self, request: reqwest::Request) -> Result<Response, Error> {
        let exchange = async {
            let response = self.transport.send(request).await?;
            Response::read(response).await
        }
        .instrument(self.span.clone());

        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(Error::Cancelled {
                        operation: self.name.clone(),
                    }),
                    result = exchange => result,
                }
            }
            None => exchange.await,
        }
    }

    /// Execute the call and decode the body into `T`.
    ///
    /// Replaces any result target set before; uses the JSON result provider
    /// unless another one is configured.
    ///
    /// # Errors
    /// Same as [`request`](Self::request), plus `Error::Result` when the
    /// provider leaves the target empty.
    pub async fn request_into<T>(&mut self) -> Result<T, Error>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let slot = ResultSlot::<T>::new();
        self.set_result(Arc::new(slot.clone()));
        if self.result_provider.is_none() {
            self.set_result_provider(Arc::new(JsonResultProvider));
        }
        self.request().await?;
        slot.take().ok_or_else(|| Error::Result {
            operation: self.name.clone(),
            source: ProviderError::NoResult,
        })
    }

    /// Blocking version of [`request`](Self::request) for sync callers.
    ///
    /// Reuses the current multi-threaded tokio runtime when there is one,
    /// otherwise runs on a temporary runtime.
    ///
    /// # Errors
    /// Same as [`request`](Self::request), plus `Error::BlockingInAsync` when
    /// called from a current-thread runtime, which cannot be blocked on.
    pub fn request_blocking(&mut self) -> Result<Response, Error> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                if !matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
                    return Err(Error::BlockingInAsync {
                        operation: self.name.clone(),
                    });
                }
                tokio::task::block_in_place(|| handle.block_on(self.request()))
            }
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::Config(format!("failed to start runtime: {e}")))?
                .block_on(self.request()),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_owned();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
