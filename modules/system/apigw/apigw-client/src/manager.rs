//! Client for the gateway manager API.
//!
//! The manager exposes the gateway's own REST surface: publishing resources,
//! managing permissions and serving the public keys used to verify gateway
//! issued JWTs.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::client::Client;
use crate::config::ConfigProvider;
use crate::error::Error;
use crate::operation::OperationConfig;
use crate::options::{self, SharedOption};
use crate::public_key::PublicKeySource;

/// API name of the gateway manager.
pub const MANAGER_API_NAME: &str = "bk-apigateway";

/// Resources of the manager API. Paths take an `api_name` path param.
pub mod operations {
    use http::Method;

    use crate::operation::OperationConfig;

    pub const GET_PUBLIC_KEY: OperationConfig = OperationConfig::from_static(
        "get_public_key",
        Method::GET,
        "/api/v1/apis/{api_name}/public_key/",
    );
    pub const SYNC_API: OperationConfig =
        OperationConfig::from_static("sync_api", Method::POST, "/api/v1/apis/{api_name}/sync/");
    pub const SYNC_STAGE: OperationConfig = OperationConfig::from_static(
        "sync_stage",
        Method::POST,
        "/api/v1/apis/{api_name}/stages/sync/",
    );
    pub const SYNC_RESOURCES: OperationConfig = OperationConfig::from_static(
        "sync_resources",
        Method::POST,
        "/api/v1/apis/{api_name}/resources/sync/",
    );
    pub const CREATE_RESOURCE_VERSION: OperationConfig = OperationConfig::from_static(
        "create_resource_version",
        Method::POST,
        "/api/v1/apis/{api_name}/resource_versions/",
    );
    pub const RELEASE: OperationConfig = OperationConfig::from_static(
        "release",
        Method::POST,
        "/api/v1/apis/{api_name}/resource_versions/release/",
    );
    pub const GET_LATEST_RESOURCE_VERSION: OperationConfig = OperationConfig::from_static(
        "get_latest_resource_version",
        Method::GET,
        "/api/v1/apis/{api_name}/resource_versions/latest/",
    );
    pub const APPLY_PERMISSIONS: OperationConfig = OperationConfig::from_static(
        "apply_permissions",
        Method::POST,
        "/api/v1/apis/{api_name}/permissions/apply/",
    );
    pub const GRANT_PERMISSIONS: OperationConfig = OperationConfig::from_static(
        "grant_permissions",
        Method::POST,
        "/api/v1/apis/{api_name}/permissions/grant/",
    );

    /// Every manager resource, for callers that build their own tables.
    pub const ALL: [OperationConfig; 9] = [
        GET_PUBLIC_KEY,
        SYNC_API,
        SYNC_STAGE,
        SYNC_RESOURCES,
        CREATE_RESOURCE_VERSION,
        RELEASE,
        GET_LATEST_RESOURCE_VERSION,
        APPLY_PERMISSIONS,
        GRANT_PERMISSIONS,
    ];
}

/// `{code, message, data}` wrapper of every manager response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, Error> {
        if self.code != 0 {
            return Err(Error::Response {
                code: self.code,
                message: self.message,
            });
        }
        self.data.ok_or_else(|| Error::Response {
            code: self.code,
            message: "response has no data".to_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PublicKeyData {
    public_key: String,
}

/// Client of the manager API with JSON bodies and results preconfigured.
#[derive(Debug)]
pub struct ManagerClient {
    client: Client,
}

impl ManagerClient {
    /// # Errors
    /// Same as [`Client::new`].
    pub fn new<P>(provider: &P, extra: &[SharedOption]) -> Result<Self, Error>
    where
        P: ConfigProvider + ?Sized,
    {
        let mut all = vec![options::json_body_provider(), options::json_result_provider()];
        all.extend_from_slice(extra);
        Ok(Self {
            client: Client::new(MANAGER_API_NAME, provider, &all)?,
        })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Call `config` on behalf of `api_name` and unwrap the response envelope.
    ///
    /// # Errors
    /// Any operation error, or `Error::Response` when the envelope reports a
    /// non-zero code or carries no data.
    pub async fn call<T>(
        &self,
        config: OperationConfig,
        api_name: &str,
        extra: &[SharedOption],
    ) -> Result<T, Error>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut operation = self
            .client
            .new_operation(config, &[options::path_params([("api_name", api_name)])]);
        operation.apply(extra);
        let envelope: Envelope<T> = operation.request_into().await?;
        envelope.into_data()
    }

    /// PEM-encoded public key of `api_name`.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub async fn get_public_key(&self, api_name: &str) -> Result<String, Error> {
        let data: PublicKeyData = self
            .call(operations::GET_PUBLIC_KEY, api_name, &[])
            .await?;
        Ok(data.public_key)
    }
}

/// Fetches public keys from the manager, with a fresh client per fetch.
pub struct ManagerPublicKeySource {
    provider: Arc<dyn ConfigProvider + Send + Sync>,
    options: Vec<SharedOption>,
}

impl std::fmt::Debug for ManagerPublicKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerPublicKeySource")
            .field("options", &self.options.len())
            .finish_non_exhaustive()
    }
}

impl ManagerPublicKeySource {
    #[must_use]
    pub fn new(provider: Arc<dyn ConfigProvider + Send + Sync>, options: Vec<SharedOption>) -> Self {
        Self { provider, options }
    }
}

#[async_trait::async_trait]
impl PublicKeySource for ManagerPublicKeySource {
    async fn fetch_public_key(&self, gateway: &str) -> Result<String, Error> {
        let manager = ManagerClient::new(self.provider.as_ref(), &self.options)?;
        manager.get_public_key(gateway).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::public_key::PublicKeyCache;
    use httpmock::prelude::*;
    use serde_json::{Value, json};

    fn manager_config(server: &MockServer) -> ClientConfig {
        ClientConfig {
            app_code: "demo-app".to_owned(),
            app_secret: "s3cret".into(),
            ..ClientConfig::with_endpoint(server.base_url())
        }
    }

    #[test]
    fn test_operation_table() {
        assert_eq!(operations::ALL.len(), 9);
        assert_eq!(operations::GET_PUBLIC_KEY.method, http::Method::GET);
        assert_eq!(
            operations::GET_PUBLIC_KEY.path,
            "/api/v1/apis/{api_name}/public_key/"
        );
        let names: std::collections::HashSet<_> =
            operations::ALL.iter().map(|op| op.name.clone()).collect();
        assert_eq!(names.len(), operations::ALL.len());
    }

    #[tokio::test]
    async fn test_get_public_key() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/apis/demo/public_key/")
                .header(
                    "x-bkapi-authorization",
                    r#"{"bk_app_code":"demo-app","bk_app_secret":"s3cret"}"#,
                );
            then.status(200).json_body(json!({
                "code": 0,
                "message": "",
                "data": {"public_key": "-----BEGIN PUBLIC KEY-----"}
            }));
        });

        let manager = ManagerClient::new(&manager_config(&server), &[]).unwrap();
        let key = manager.get_public_key("demo").await.unwrap();

        assert_eq!(key, "-----BEGIN PUBLIC KEY-----");
        mock.assert();
    }

    #[tokio::test]
    async fn test_non_zero_code_is_response_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/apis/missing/public_key/");
            then.status(200)
                .json_body(json!({"code": 40400, "message": "api not found", "data": null}));
        });

        let manager = ManagerClient::new(&manager_config(&server), &[]).unwrap();
        let err = manager.get_public_key("missing").await.unwrap_err();

        assert!(matches!(err, Error::Response { code: 40400, ref message } if message == "api not found"));
    }

    #[tokio::test]
    async fn test_call_sends_json_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/apis/demo/permissions/grant/")
                .header("content-type", "application/json")
                .json_body(json!({"target_app_code": "other"}));
            then.status(200).json_body(json!({"code": 0, "data": {"granted": true}}));
        });

        let manager = ManagerClient::new(&manager_config(&server), &[]).unwrap();
        let data: Value = manager
            .call(
                operations::GRANT_PERMISSIONS,
                "demo",
                &[options::body(&json!({"target_app_code": "other"}))],
            )
            .await
            .unwrap();

        assert_eq!(data, json!({"granted": true}));
        mock.assert();
    }

    #[tokio::test]
    async fn test_cache_backed_by_manager() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/apis/demo/public_key/");
            then.status(200)
                .json_body(json!({"code": 0, "data": {"public_key": "pem"}}));
        });

        let source = ManagerPublicKeySource::new(Arc::new(manager_config(&server)), vec![]);
        let cache = PublicKeyCache::new(Arc::new(source));

        assert_eq!(cache.get("demo").await.unwrap(), "pem");
        assert_eq!(cache.get("demo").await.unwrap(), "pem");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_gateway_rejection_surfaces_through_cache() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/apis/demo/public_key/");
            then.status(403)
                .header("x-bkapi-error-code", "1640001")
                .header("x-bkapi-error-message", "app not permitted");
        });

        let source = ManagerPublicKeySource::new(Arc::new(manager_config(&server)), vec![]);
        let cache = PublicKeyCache::new(Arc::new(source));
        let err = cache.get("demo").await.unwrap_err();

        let gateway = err.as_gateway().unwrap();
        assert_eq!(gateway.error_code(), "1640001");
        assert_eq!(gateway.error_message(), "app not permitted");
    }
}
