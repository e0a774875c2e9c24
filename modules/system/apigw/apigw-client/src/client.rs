use std::sync::Arc;

use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue};
use tracing::Span;

use crate::auth::authorization_headers;
use crate::config::ConfigProvider;
use crate::error::{ERROR_CODE_HEADER, ERROR_MESSAGE_HEADER, Error, header_str};
use crate::operation::{Operation, OperationConfig, ResponseEvent};
use crate::options::{OptionRegistry, SharedOption, global_options};
use crate::transport::{ReqwestTransport, Transport};

/// `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("cf-apigw-client/", env!("CARGO_PKG_VERSION"));

/// Client bound to one gateway API.
///
/// The base URL and the authorization headers are resolved once, at
/// construction. Operations created afterwards share the client's transport,
/// default headers and common options.
pub struct Client {
    name: String,
    base_url: String,
    transport: Arc<dyn Transport>,
    default_headers: HeaderMap,
    common_options: Vec<SharedOption>,
    span: Span,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("common_options", &self.common_options.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client for `api_name`, starting from the process-wide options.
    ///
    /// # Errors
    /// See [`with_registry`](Self::with_registry).
    pub fn new<P>(api_name: &str, provider: &P, options: &[SharedOption]) -> Result<Self, Error>
    where
        P: ConfigProvider + ?Sized,
    {
        Self::with_registry(api_name, provider, &global_options(), options)
    }

    /// Create a client for `api_name`.
    ///
    /// Options are applied in three phases: those of `registry`, those carried
    /// by the provided config, then `options`.
    ///
    /// # Errors
    /// - `Error::Config` if the config resolves to an empty base URL or the
    ///   HTTP client cannot be built
    /// - `Error::OptionApply` naming the phase whose option failed
    pub fn with_registry<P>(
        api_name: &str,
        provider: &P,
        registry: &OptionRegistry,
        options: &[SharedOption],
    ) -> Result<Self, Error>
    where
        P: ConfigProvider + ?Sized,
    {
        let config = provider.provide_config(api_name);
        let base_url = config.base_url();
        if base_url.is_empty() {
            return Err(Error::Config(format!(
                "no endpoint configured for api {api_name}"
            )));
        }

        let mut default_headers = authorization_headers(&config);
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let span = match &config.span {
            Some(parent) => tracing::info_span!(parent: parent, "apigw_client", api = %api_name),
            None => tracing::info_span!("apigw_client", api = %api_name),
        };

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        let mut client = Self {
            name: api_name.to_owned(),
            base_url,
            transport: Arc::new(ReqwestTransport::new(http_client)),
            default_headers,
            common_options: Vec::new(),
            span,
        };

        for (phase, options) in [
            ("global", registry.options()),
            ("config", config.client_options.as_slice()),
            ("explicit", options),
        ] {
            for option in options {
                option
                    .apply_to_client(&mut client)
                    .map_err(|source| Error::OptionApply {
                        phase,
                        source: Box::new(source),
                    })?;
            }
        }

        tracing::debug!(parent: &client.span, base_url = %client.base_url, "client created");
        Ok(client)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Options applied to every operation before its own options.
    #[must_use]
    pub fn operation_options(&self) -> &[SharedOption] {
        &self.common_options
    }

    /// Add options for operations created from now on.
    pub fn add_operation_options(&mut self, options: impl IntoIterator<Item = SharedOption>) {
        self.common_options.extend(options);
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    /// Create an operation for `config`.
    ///
    /// Never fails: a failing option is recorded in the operation and reported
    /// by [`Operation::request`].
    #[must_use]
    pub fn new_operation(&self, config: OperationConfig, options: &[SharedOption]) -> Operation {
        let mut operation = Operation::new(
            &config,
            &self.base_url,
            self.default_headers.clone(),
            Arc::clone(&self.transport),
            self.span.clone(),
        );
        operation.on_response(Arc::new(log_response));
        operation.apply(&self.common_options).apply(options);
        operation
    }
}

fn log_response(event: &ResponseEvent<'_>) {
    let response = event.response;
    let status = response.status();
    let headers = response.headers();
    let request_id = response.request_id().unwrap_or_default();
    let error_code = header_str(headers, ERROR_CODE_HEADER).unwrap_or_default();
    let error_message = header_str(headers, ERROR_MESSAGE_HEADER).unwrap_or_default();
    let elapsed_ms = u64::try_from(event.elapsed.as_millis()).unwrap_or(u64::MAX);

    if status.is_server_error() {
        tracing::error!(
            operation = event.operation,
            method = %event.method,
            url = %event.url,
            status = status.as_u16(),
            elapsed_ms,
            request_id = %request_id,
            error_code = %error_code,
            error_message = %error_message,
            "request failed, caused by server"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            operation = event.operation,
            method = %event.method,
            url = %event.url,
            status = status.as_u16(),
            elapsed_ms,
            request_id = %request_id,
            error_code = %error_code,
            error_message = %error_message,
            "request failed, caused by client"
        );
    } else {
        tracing::debug!(
            operation = event.operation,
            method = %event.method,
            url = %event.url,
            status = status.as_u16(),
            elapsed_ms,
            request_id = %request_id,
            "request completed"
        );
    }
}
