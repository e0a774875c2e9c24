use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::error::Error;
use crate::options::SharedOption;
use crate::template::replace_placeholders;

/// Prefix of the environment variables read by [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "BKAPI_";

/// Stage used when none is configured.
pub const DEFAULT_STAGE: &str = "prod";

/// Keys read from `BKAPI_*` variables; other variables with the prefix are ignored.
const ENV_KEYS: [&str; 8] = [
    "endpoint",
    "url_template",
    "stage",
    "app_code",
    "app_secret",
    "access_token",
    "authorization_jwt",
    "authorization_params",
];

/// Serializes authorization params into the header value.
pub type AuthSerializer =
    Arc<dyn Fn(&BTreeMap<String, String>) -> Result<String, serde_json::Error> + Send + Sync>;

/// A string that also accepts numbers and booleans.
///
/// Figment parses `BKAPI_APP_SECRET=123456` into an integer; the raw text is
/// what the gateway expects.
struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = String;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
                Ok(v.to_owned())
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
                Ok(v)
            }

            fn visit_char<E: de::Error>(self, v: char) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
                Ok(v.to_string())
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(ScalarVisitor).map(Self)
    }
}

fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(|s| s.0)
}

fn scalar_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let map = HashMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(map.into_iter().map(|(k, v)| (k, v.0)).collect())
}

/// Credential material that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Scalar")]
pub struct Secret(String);

impl From<Scalar> for Secret {
    fn from(value: Scalar) -> Self {
        Self(value.0)
    }
}

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "Secret(\"\")")
        } else {
            write!(f, "Secret([REDACTED])")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Configuration of a client bound to one gateway API.
///
/// A `ClientConfig` is a template: [`ConfigProvider::provide_config`] copies it
/// and binds the copy to an API name, so one value can serve many clients.
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// API this config is bound to. Set by [`ConfigProvider::provide_config`],
    /// which overwrites whatever the template holds.
    #[serde(skip)]
    pub api_name: String,

    /// Base URL of the API, may contain `{api_name}` and `{stage}`.
    #[serde(deserialize_with = "scalar")]
    pub endpoint: String,
    /// Used in place of `endpoint` when the latter is empty. The stage is
    /// appended as a path segment unless the template places it itself.
    #[serde(deserialize_with = "scalar")]
    pub url_template: String,
    #[serde(deserialize_with = "scalar")]
    pub stage: String,

    #[serde(deserialize_with = "scalar")]
    pub app_code: String,
    pub app_secret: Secret,
    pub access_token: Secret,
    pub authorization_jwt: Secret,
    /// Extra authorization params, merged only when no access token is set.
    #[serde(deserialize_with = "scalar_map")]
    pub authorization_params: HashMap<String, String>,

    /// Parent span for everything the client logs.
    #[serde(skip)]
    pub span: Option<tracing::Span>,
    /// Options applied to every client built from this config.
    #[serde(skip)]
    pub client_options: Vec<SharedOption>,
    /// Replaces `serde_json` for the authorization header.
    #[serde(skip)]
    pub auth_serializer: Option<AuthSerializer>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_name", &self.api_name)
            .field("endpoint", &self.endpoint)
            .field("url_template", &self.url_template)
            .field("stage", &self.stage)
            .field("app_code", &self.app_code)
            .field("app_secret", &self.app_secret)
            .field("access_token", &self.access_token)
            .field("authorization_jwt", &self.authorization_jwt)
            .field("authorization_params", &self.authorization_params.keys())
            .field("span", &self.span)
            .field("client_options", &self.client_options.len())
            .field("auth_serializer", &self.auth_serializer.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration pointing at a fixed endpoint.
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `BKAPI_*` environment variables.
    ///
    /// Recognized: `BKAPI_ENDPOINT`, `BKAPI_URL_TEMPLATE`, `BKAPI_STAGE`,
    /// `BKAPI_APP_CODE`, `BKAPI_APP_SECRET`, `BKAPI_ACCESS_TOKEN`,
    /// `BKAPI_AUTHORIZATION_JWT`, `BKAPI_AUTHORIZATION_PARAMS` (as `{k=v}`).
    /// Other `BKAPI_*` variables are ignored.
    ///
    /// # Errors
    /// Returns `Error::Config` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_figment(Figment::new().merge(env_provider()))
    }

    /// Load configuration from a YAML file, with `BKAPI_*` variables on top.
    ///
    /// # Errors
    /// Returns `Error::Config` if the file cannot be read or has unknown keys.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_figment(
            Figment::new()
                .merge(Yaml::file_exact(path.as_ref()))
                .merge(env_provider()),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, Error> {
        figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load client config: {e}")))
    }

    #[must_use]
    pub fn stage(&self) -> &str {
        if self.stage.is_empty() {
            DEFAULT_STAGE
        } else {
            &self.stage
        }
    }

    /// Resolve the base URL of the bound API.
    ///
    /// Returns an empty string when neither `endpoint` nor `url_template` is set.
    #[must_use]
    pub fn base_url(&self) -> String {
        let template = if self.endpoint.is_empty() {
            if self.url_template.is_empty() {
                return String::new();
            }
            if self.url_template.contains("{stage}") {
                self.url_template.clone()
            } else {
                format!("{}/{{stage}}", self.url_template.trim_end_matches('/'))
            }
        } else {
            self.endpoint.clone()
        };

        let params = HashMap::from([
            ("api_name".to_owned(), self.api_name.clone()),
            ("stage".to_owned(), self.stage().to_owned()),
        ]);
        replace_placeholders(&template, &params)
    }
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).only(&ENV_KEYS)
}

/// Source of per-API client configuration.
pub trait ConfigProvider {
    /// Produce an independent configuration bound to `api_name`.
    fn provide_config(&self, api_name: &str) -> ClientConfig;
}

impl ConfigProvider for ClientConfig {
    fn provide_config(&self, api_name: &str) -> ClientConfig {
        let mut config = self.clone();
        api_name.clone_into(&mut config.api_name);
        config
    }
}

impl<F> ConfigProvider for F
where
    F: Fn(&str) -> ClientConfig,
{
    fn provide_config(&self, api_name: &str) -> ClientConfig {
        let mut config = self(api_name);
        api_name.clone_into(&mut config.api_name);
        config
    }
}
