//! Authorization header derived from client credentials.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ClientConfig;

/// Header carrying the JSON-encoded authorization params.
pub const AUTHORIZATION_HEADER: &str = "x-bkapi-authorization";

/// Collect the authorization params for `config`.
///
/// An access token takes precedence over everything else: once it is set, app
/// credentials and extra params are not sent at all.
#[must_use]
pub fn authorization_params(config: &ClientConfig) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    if !config.access_token.is_empty() {
        params.insert(
            "access_token".to_owned(),
            config.access_token.expose().to_owned(),
        );
        if !config.authorization_jwt.is_empty() {
            params.insert(
                "jwt".to_owned(),
                config.authorization_jwt.expose().to_owned(),
            );
        }
        return params;
    }

    if !config.app_code.is_empty() {
        params.insert("bk_app_code".to_owned(), config.app_code.clone());
    }
    if !config.app_secret.is_empty() {
        params.insert(
            "bk_app_secret".to_owned(),
            config.app_secret.expose().to_owned(),
        );
    }
    params.extend(
        config
            .authorization_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    params
}

/// Build the authorization headers for `config`; empty when no credentials
/// are configured.
///
/// # Panics
/// Panics if the configured serializer fails or yields a value that is not a
/// valid header. The params are plain strings, so this only happens with a
/// broken custom serializer.
#[must_use]
pub fn authorization_headers(config: &ClientConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let params = authorization_params(config);
    if params.is_empty() {
        return headers;
    }

    let encoded = match &config.auth_serializer {
        Some(serialize) => serialize(&params),
        None => serde_json::to_string(&params),
    };
    let encoded = match encoded {
        Ok(encoded) => encoded,
        Err(e) => panic!("failed to serialize authorization params: {e}"),
    };
    let mut value = match HeaderValue::from_str(&encoded) {
        Ok(value) => value,
        Err(e) => panic!("authorization params are not a valid header value: {e}"),
    };
    value.set_sensitive(true);
    headers.insert(HeaderName::from_static(AUTHORIZATION_HEADER), value);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use std::sync::Arc;

    fn header_json(config: &ClientConfig) -> Option<String> {
        authorization_headers(config)
            .get(AUTHORIZATION_HEADER)
            .map(|v| v.to_str().unwrap().to_owned())
    }

    #[test]
    fn test_app_credentials_only() {
        let config = ClientConfig {
            app_code: "app".to_owned(),
            app_secret: Secret::new("secret"),
            ..ClientConfig::default()
        };
        assert_eq!(
            header_json(&config).as_deref(),
            Some(r#"{"bk_app_code":"app","bk_app_secret":"secret"}"#)
        );
    }

    #[test]
    fn test_access_token_excludes_app_credentials_and_extra_params() {
        let mut config = ClientConfig {
            app_code: "app".to_owned(),
            app_secret: Secret::new("secret"),
            access_token: Secret::new("token"),
            ..ClientConfig::default()
        };
        config
            .authorization_params
            .insert("bk_username".to_owned(), "admin".to_owned());

        let params = authorization_params(&config);
        assert_eq!(params.get("access_token").map(String::as_str), Some("token"));
        assert!(!params.contains_key("bk_app_code"));
        assert!(!params.contains_key("bk_app_secret"));
        assert!(!params.contains_key("bk_username"));
        assert_eq!(header_json(&config).as_deref(), Some(r#"{"access_token":"token"}"#));
    }

    #[test]
    fn test_access_token_with_jwt() {
        let config = ClientConfig {
            access_token: Secret::new("token"),
            authorization_jwt: Secret::new("jwt-value"),
            ..ClientConfig::default()
        };
        assert_eq!(
            header_json(&config).as_deref(),
            Some(r#"{"access_token":"token","jwt":"jwt-value"}"#)
        );
    }

    #[test]
    fn test_jwt_without_access_token_is_ignored() {
        let config = ClientConfig {
            app_code: "app".to_owned(),
            authorization_jwt: Secret::new("jwt-value"),
            ..ClientConfig::default()
        };
        assert_eq!(header_json(&config).as_deref(), Some(r#"{"bk_app_code":"app"}"#));
    }

    #[test]
    fn test_extra_params_overwrite_app_credentials() {
        let mut config = ClientConfig {
            app_code: "app".to_owned(),
            ..ClientConfig::default()
        };
        config
            .authorization_params
            .insert("bk_app_code".to_owned(), "override".to_owned());
        config
            .authorization_params
            .insert("bk_username".to_owned(), "admin".to_owned());

        let params = authorization_params(&config);
        assert_eq!(params["bk_app_code"], "override");
        assert_eq!(params["bk_username"], "admin");
    }

    #[test]
    fn test_no_credentials_no_header() {
        assert!(authorization_headers(&ClientConfig::default()).is_empty());
    }

    #[test]
    fn test_custom_serializer() {
        let config = ClientConfig {
            app_code: "app".to_owned(),
            auth_serializer: Some(Arc::new(|params: &BTreeMap<String, String>| {
                Ok::<_, serde_json::Error>(params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(";"))
            })),
            ..ClientConfig::default()
        };
        assert_eq!(header_json(&config).as_deref(), Some("bk_app_code=app"));
    }

    #[test]
    #[should_panic(expected = "failed to serialize authorization params")]
    fn test_failing_serializer_panics() {
        let config = ClientConfig {
            app_code: "app".to_owned(),
            auth_serializer: Some(Arc::new(|_: &BTreeMap<String, String>| {
                Err::<String, _>(<serde_json::Error as serde::ser::Error>::custom(
                    "broken serializer",
                ))
            })),
            ..ClientConfig::default()
        };
        let _ = authorization_headers(&config);
    }
}
