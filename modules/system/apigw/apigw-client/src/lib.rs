//! API gateway client
//!
//! Building blocks for calling resources published on an API gateway:
//!
//! - [`Client`] bound to one gateway API, resolving its base URL and
//!   authorization headers once
//! - [`Operation`], one call, configured by layered [`options`] and executed
//!   with a body provider, the transport and a result provider
//! - gateway error normalization: a response carrying `x-bkapi-error-code` is
//!   an [`Error::Gateway`] whatever its HTTP status
//! - [`PublicKeyCache`], a single-flight cache of gateway public keys with
//!   jittered expiry, used by [`JwtVerifier`]
//!
//! # Examples
//!
//! ```no_run
//! use apigw_client::{Client, ClientConfig, OperationConfig, options};
//! use http::Method;
//! use serde_json::{Value, json};
//!
//! # async fn example() -> Result<(), apigw_client::Error> {
//! let config = ClientConfig {
//!     app_code: "demo-app".to_owned(),
//!     app_secret: "secret".into(),
//!     ..ClientConfig::with_endpoint("http://{api_name}.apigw.example.com/{stage}")
//! };
//! let client = Client::new(
//!     "demo",
//!     &config,
//!     &[options::json_body_provider(), options::json_result_provider()],
//! )?;
//!
//! let mut echo = client.new_operation(
//!     OperationConfig::new("echo", Method::POST, "/echo/"),
//!     &[options::body(&json!({"from": "body"}))],
//! );
//! let echoed: Value = echo.request_into().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Blocking usage
//!
//! ```no_run
//! use apigw_client::{Client, ClientConfig, OperationConfig};
//! use http::Method;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("demo", &ClientConfig::from_env()?, &[])?;
//! let mut ping = client.new_operation(OperationConfig::new("ping", Method::GET, "/ping/"), &[]);
//! let response = ping.request_blocking()?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
pub mod config;
pub mod definition;
mod error;
pub mod jwt;
pub mod manager;
mod operation;
pub mod options;
pub mod provider;
pub mod public_key;
mod response;
pub mod template;
mod transport;

#[cfg(test)]
mod test_support;

pub use client::{Client, DEFAULT_USER_AGENT};
pub use config::{ClientConfig, ConfigProvider, Secret};
pub use error::{
    ERROR_CODE_HEADER, ERROR_MESSAGE_HEADER, Error, GatewayError, ProviderError, REQUEST_ID_HEADER,
};
pub use jwt::{Claims, JwtError, JwtVerifier, PublicKeyProvider};
pub use operation::{Operation, OperationConfig, ResponseEvent, ResponseHook};
pub use options::{ApiOption, OptionRegistry, SharedOption};
pub use provider::ResultSlot;
pub use public_key::{PublicKeyCache, PublicKeySource};
pub use response::Response;
pub use template::replace_placeholders;
pub use transport::{ReqwestTransport, Transport};

pub use http::{Method, StatusCode};
