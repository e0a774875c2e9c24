//! Options that configure a [`Client`] or a single [`Operation`].
//!
//! An option carries two independent capabilities. Applied to a client it
//! changes the client for good (or registers itself as a common option for
//! every future operation); applied to an operation it affects that call
//! only. Either capability may be a no-op.
//!
//! ```no_run
//! use std::sync::Arc;
//! use apigw_client::{Client, ClientConfig, OperationConfig, ResultSlot, options};
//! use http::Method;
//!
//! # async fn example() -> Result<(), apigw_client::Error> {
//! let client = Client::new(
//!     "demo",
//!     &ClientConfig::with_endpoint("http://demo.example.com"),
//!     &[options::json_body_provider(), options::json_result_provider()],
//! )?;
//!
//! let result = ResultSlot::<serde_json::Value>::new();
//! let mut operation = client.new_operation(
//!     OperationConfig::new("get_user", Method::GET, "/users/{id}/"),
//!     &[
//!         options::path_params([("id", "42")]),
//!         options::result(Arc::new(result.clone())),
//!     ],
//! );
//! operation.request().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::Error;
use crate::operation::{Operation, ResponseHook};
use crate::provider::{
    BodyProvider, FormBodyProvider, JsonBodyProvider, JsonResultProvider,
    MultipartFormBodyProvider, ResultProvider, ResultTarget,
};
use crate::transport::Transport;

/// A unit of configuration for clients and operations.
///
/// Implementations must be reentrant: one option value may be applied to many
/// clients and operations, from many threads.
pub trait ApiOption: Send + Sync {
    /// Configure `client` for every operation it will create.
    ///
    /// # Errors
    /// Returns the reason the option cannot be applied.
    fn apply_to_client(&self, client: &mut Client) -> Result<(), Error> {
        let _ = client;
        Ok(())
    }

    /// Configure a single `operation`.
    ///
    /// # Errors
    /// Returns the reason the option cannot be applied.
    fn apply_to_operation(&self, operation: &mut Operation) -> Result<(), Error> {
        let _ = operation;
        Ok(())
    }
}

/// Options are shared by reference between clients and operations.
pub type SharedOption = Arc<dyn ApiOption>;

type ClientApply = dyn Fn(&mut Client) -> Result<(), Error> + Send + Sync;
type OperationApply = dyn Fn(&mut Operation) -> Result<(), Error> + Send + Sync;

/// Option that only configures clients.
pub struct ClientOption {
    apply: Box<ClientApply>,
}

impl ClientOption {
    #[must_use]
    pub fn shared<F>(apply: F) -> SharedOption
    where
        F: Fn(&mut Client) -> Result<(), Error> + Send + Sync + 'static,
    {
        Arc::new(Self {
            apply: Box::new(apply),
        })
    }
}

impl ApiOption for ClientOption {
    fn apply_to_client(&self, client: &mut Client) -> Result<(), Error> {
        (self.apply)(client)
    }
}

/// Option that only configures operations; a no-op on clients.
pub struct OperationOption {
    apply: Arc<OperationApply>,
}

impl OperationOption {
    #[must_use]
    pub fn shared<F>(apply: F) -> SharedOption
    where
        F: Fn(&mut Operation) -> Result<(), Error> + Send + Sync + 'static,
    {
        Arc::new(Self {
            apply: Arc::new(apply),
        })
    }
}

impl ApiOption for OperationOption {
    fn apply_to_operation(&self, operation: &mut Operation) -> Result<(), Error> {
        (self.apply)(operation)
    }
}

/// Operation option that, applied to a client, becomes one of the client's
/// common operation options.
pub struct CommonOption {
    apply: Arc<OperationApply>,
}

impl CommonOption {
    #[must_use]
    pub fn shared<F>(apply: F) -> SharedOption
    where
        F: Fn(&mut Operation) -> Result<(), Error> + Send + Sync + 'static,
    {
        Arc::new(Self {
            apply: Arc::new(apply),
        })
    }
}

impl ApiOption for CommonOption {
    fn apply_to_client(&self, client: &mut Client) -> Result<(), Error> {
        client.add_operation_options([Arc::new(OperationOption {
            apply: Arc::clone(&self.apply),
        }) as SharedOption]);
        Ok(())
    }

    fn apply_to_operation(&self, operation: &mut Operation) -> Result<(), Error> {
        (self.apply)(operation)
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// Options applied to every client constructed with this registry, before the
/// options carried by the config and those passed to the constructor.
#[derive(Clone, Default)]
pub struct OptionRegistry {
    options: Vec<SharedOption>,
}

impl std::fmt::Debug for OptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionRegistry")
            .field("options", &self.options.len())
            .finish()
    }
}

impl OptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, options: impl IntoIterator<Item = SharedOption>) -> &mut Self {
        self.options.extend(options);
        self
    }

    #[must_use]
    pub fn options(&self) -> &[SharedOption] {
        &self.options
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

static GLOBAL_OPTIONS: RwLock<Vec<SharedOption>> = parking_lot::const_rwlock(Vec::new());

/// Register options for every client created afterwards through
/// [`Client::new`].
///
/// Meant for process start-up, before clients are built concurrently; clients
/// only see options registered before their construction.
pub fn register_global_options(options: impl IntoIterator<Item = SharedOption>) {
    GLOBAL_OPTIONS.write().extend(options);
}

/// Snapshot of the process-wide options.
#[must_use]
pub fn global_options() -> OptionRegistry {
    OptionRegistry {
        options: GLOBAL_OPTIONS.read().clone(),
    }
}

// ---------------------------------------------------------------------------
// Built-in options
// ---------------------------------------------------------------------------

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let header_name =
        HeaderName::try_from(name).map_err(|e| Error::invalid_header(name, &e))?;
    let header_value =
        HeaderValue::try_from(value).map_err(|e| Error::invalid_header(name, &e))?;
    Ok((header_name, header_value))
}

/// Set a request header. Invalid names or values fail when applied.
#[must_use]
pub fn header(name: &str, value: &str) -> SharedOption {
    headers([(name, value)])
}

/// Set several request headers.
#[must_use]
pub fn headers<I, K, V>(pairs: I) -> SharedOption
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let parsed: Result<Vec<_>, Error> = pairs
        .into_iter()
        .map(|(k, v)| parse_header(k.as_ref(), v.as_ref()))
        .collect();
    CommonOption::shared(move |op| {
        for (name, value) in parsed.clone()? {
            op.insert_header(name, value);
        }
        Ok(())
    })
}

/// Append a query parameter.
#[must_use]
pub fn query_param(key: &str, value: &str) -> SharedOption {
    query_params([(key, value)])
}

/// Append several query parameters.
#[must_use]
pub fn query_params<I, K, V>(pairs: I) -> SharedOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let pairs: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    CommonOption::shared(move |op| {
        op.set_query_params(pairs.iter().cloned());
        Ok(())
    })
}

/// Substitute `{name}` placeholders in the operation path at send time.
#[must_use]
pub fn path_params<I, K, V>(params: I) -> SharedOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let params: HashMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    CommonOption::shared(move |op| {
        op.set_path_params(params.clone());
        Ok(())
    })
}

/// Use `data` as the request body. Serialization happens once, here; a
/// failure is reported when the option is applied.
#[must_use]
pub fn body<T: Serialize + ?Sized>(data: &T) -> SharedOption {
    let value = serde_json::to_value(data).map_err(Arc::new);
    OperationOption::shared(move |op| {
        match &value {
            Ok(value) => {
                op.set_body_value(value.clone());
                Ok(())
            }
            Err(source) => Err(Error::Serialization {
                operation: op.name().to_owned(),
                source: Arc::clone(source),
            }),
        }
    })
}

/// Decode the response into `target`.
#[must_use]
pub fn result(target: Arc<dyn ResultTarget>) -> SharedOption {
    OperationOption::shared(move |op| {
        op.set_result(Arc::clone(&target));
        Ok(())
    })
}

#[must_use]
pub fn body_provider(provider: Arc<dyn BodyProvider>) -> SharedOption {
    CommonOption::shared(move |op| {
        op.set_body_provider(Arc::clone(&provider));
        Ok(())
    })
}

#[must_use]
pub fn result_provider(provider: Arc<dyn ResultProvider>) -> SharedOption {
    CommonOption::shared(move |op| {
        op.set_result_provider(Arc::clone(&provider));
        Ok(())
    })
}

#[must_use]
pub fn json_body_provider() -> SharedOption {
    body_provider(Arc::new(JsonBodyProvider))
}

#[must_use]
pub fn form_body_provider() -> SharedOption {
    body_provider(Arc::new(FormBodyProvider))
}

#[must_use]
pub fn multipart_form_body_provider() -> SharedOption {
    body_provider(Arc::new(MultipartFormBodyProvider))
}

#[must_use]
pub fn json_result_provider() -> SharedOption {
    result_provider(Arc::new(JsonResultProvider))
}

/// Per-request timeout, enforced by the transport.
#[must_use]
pub fn timeout(duration: Duration) -> SharedOption {
    CommonOption::shared(move |op| {
        op.set_timeout(duration);
        Ok(())
    })
}

/// Replace the client's transport.
#[must_use]
pub fn transport(transport: Arc<dyn Transport>) -> SharedOption {
    ClientOption::shared(move |client| {
        client.set_transport(Arc::clone(&transport));
        Ok(())
    })
}

/// Abort the operation when `token` is cancelled.
#[must_use]
pub fn cancellation(token: CancellationToken) -> SharedOption {
    OperationOption::shared(move |op| {
        op.set_cancellation(token.clone());
        Ok(())
    })
}

/// Observe every response the operation receives.
#[must_use]
pub fn on_response(hook: ResponseHook) -> SharedOption {
    CommonOption::shared(move |op| {
        op.on_response(Arc::clone(&hook));
        Ok(())
    })
}

/// Body data for callers that already hold a JSON value.
#[must_use]
pub fn body_value(value: Value) -> SharedOption {
    OperationOption::shared(move |op| {
        op.set_body_value(value.clone());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::operation::OperationConfig;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(options: &[SharedOption]) -> Client {
        Client::with_registry(
            "demo",
            &ClientConfig::with_endpoint("http://demo.example.com"),
            &OptionRegistry::new(),
            options,
        )
        .unwrap()
    }

    fn get(path: &'static str) -> OperationConfig {
        OperationConfig::new("", Method::GET, path)
    }

    #[test]
    fn test_common_option_registers_on_client() {
        let mut client = client(&[]);
        assert_eq!(client.operation_options().len(), 0);

        header("x-demo", "1").apply_to_client(&mut client).unwrap();
        assert_eq!(client.operation_options().len(), 1);

        let op = client.new_operation(get("/"), &[]);
        assert_eq!(op.headers()["x-demo"], "1");
    }

    #[test]
    fn test_operation_option_is_noop_on_client() {
        let mut client = client(&[]);
        body_value(serde_json::json!({"a": 1}))
            .apply_to_client(&mut client)
            .unwrap();
        assert!(client.operation_options().is_empty());
    }

    #[test]
    fn test_invalid_header_fails_on_apply() {
        let client = client(&[]);
        let op = client.new_operation(get("/"), &[header("bad header", "v")]);
        assert!(matches!(op.error(), Some(Error::InvalidHeader { .. })));
    }

    #[test]
    fn test_option_is_reusable_across_operations() {
        let client = client(&[]);
        let shared = header("x-shared", "yes");

        let first = client.new_operation(get("/a"), std::slice::from_ref(&shared));
        let second = client.new_operation(get("/b"), std::slice::from_ref(&shared));
        assert_eq!(first.headers()["x-shared"], "yes");
        assert_eq!(second.headers()["x-shared"], "yes");
    }

    #[test]
    fn test_option_is_shareable_across_threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counting = {
            let counter = Arc::clone(&counter);
            OperationOption::shared(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let client = Arc::new(client(&[]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                let counting = Arc::clone(&counting);
                std::thread::spawn(move || {
                    let op = client.new_operation(get("/"), &[counting]);
                    assert!(op.error().is_none());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_body_option_reports_serialization_failure() {
        let mut map = HashMap::new();
        map.insert(vec![1_u8], "non-string keys cannot become JSON");

        let client = client(&[]);
        let op = client.new_operation(get("/"), &[body(&map)]);
        assert!(matches!(op.error(), Some(Error::Serialization { .. })));
    }

    #[test]
    fn test_explicit_registry() {
        let mut registry = OptionRegistry::new();
        registry.register([header("x-registry", "on")]);
        assert!(!registry.is_empty());

        let client = Client::with_registry(
            "demo",
            &ClientConfig::with_endpoint("http://demo.example.com"),
            &registry,
            &[],
        )
        .unwrap();
        let op = client.new_operation(get("/"), &[]);
        assert_eq!(op.headers()["x-registry"], "on");
    }
}
