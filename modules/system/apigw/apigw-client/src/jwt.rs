//! Verification of gateway-issued JWTs.
//!
//! The gateway signs the tokens it forwards to backends with its own RSA key
//! and names itself in the `kid` header. Backends look the public key up by
//! that id, usually through a [`PublicKeyCache`].

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use thiserror::Error;

use crate::error::Error;
use crate::public_key::PublicKeyCache;

/// Looks up PEM-encoded public keys by key id.
#[async_trait::async_trait]
pub trait PublicKeyProvider: Send + Sync {
    /// # Errors
    /// Returns the reason no key is available for `key_id`.
    async fn public_key(&self, key_id: &str) -> Result<String, Error>;
}

#[async_trait::async_trait]
impl PublicKeyProvider for PublicKeyCache {
    async fn public_key(&self, key_id: &str) -> Result<String, Error> {
        self.get(key_id).await
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),

    #[error("token header has no key id")]
    KeyIdInvalid,

    #[error("no public key for key id {key_id}: {source}")]
    PublicKey {
        key_id: String,
        #[source]
        source: Error,
    },

    #[error("invalid public key for key id {key_id}: {source}")]
    InvalidKey {
        key_id: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
}

/// Calling application, as verified by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppClaims {
    #[serde(alias = "bk_app_code")]
    pub app_code: String,
    pub verified: bool,
}

/// Calling user, as verified by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserClaims {
    #[serde(alias = "bk_username")]
    pub username: String,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub app: AppClaims,
    #[serde(default)]
    pub user: UserClaims,
    #[serde(default)]
    pub iss: String,
    pub exp: u64,
    #[serde(default)]
    pub nbf: Option<u64>,
}

/// Verifies RS512 tokens against keys from a [`PublicKeyProvider`].
pub struct JwtVerifier {
    keys: Arc<dyn PublicKeyProvider>,
    leeway: u64,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    #[must_use]
    pub fn new(keys: Arc<dyn PublicKeyProvider>) -> Self {
        Self { keys, leeway: 0 }
    }

    /// Clock skew tolerated on `exp` and `nbf`, in seconds.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// - `JwtError::Malformed` if the header cannot be decoded
    /// - `JwtError::KeyIdInvalid` if the header has no `kid`
    /// - `JwtError::PublicKey` / `JwtError::InvalidKey` if no usable key exists
    /// - `JwtError::Rejected` for bad signatures, expired or not yet valid tokens
    pub async fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let header = decode_header(token).map_err(JwtError::Malformed)?;
        let key_id = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(JwtError::KeyIdInvalid)?;

        let pem = self
            .keys
            .public_key(&key_id)
            .await
            .map_err(|source| JwtError::PublicKey {
                key_id: key_id.clone(),
                source,
            })?;
        let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|source| {
            JwtError::InvalidKey {
                key_id: key_id.clone(),
                source,
            }
        })?;

        let mut validation = Validation::new(Algorithm::RS512);
        validation.validate_nbf = true;
        validation.leeway = self.leeway;

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            tracing::debug!(key_id = %key_id, error = %e, "jwt rejected");
            JwtError::Rejected(e)
        })?;
        Ok(data.claims)
    }
}
