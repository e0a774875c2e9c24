//! Strategies that encode request bodies and decode response bodies.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProviderError;
use crate::response::Response;

/// An encoded request payload.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub content_type: HeaderValue,
    pub bytes: Bytes,
}

impl EncodedBody {
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.bytes.len()
    }
}

/// Turns operation body data into a request payload.
pub trait BodyProvider: Send + Sync {
    /// Encode `data`. `None` and `null` mean "no body" and yield `Ok(None)`
    /// without touching the encoder.
    ///
    /// # Errors
    /// Returns `ProviderError` if `data` cannot be encoded.
    fn provide_body(&self, data: Option<&Value>) -> Result<Option<EncodedBody>, ProviderError>;
}

/// Receives a decoded response body.
pub trait ResultTarget: Send + Sync {
    /// Store `value` in the target.
    ///
    /// # Errors
    /// Returns `ProviderError` if `value` does not fit the target type.
    fn fill(&self, value: Value) -> Result<(), ProviderError>;
}

/// Decodes a response body into a result target.
pub trait ResultProvider: Send + Sync {
    /// Decode `response` into `target`. Without a target nothing is decoded.
    ///
    /// # Errors
    /// Returns `ProviderError` if decoding fails.
    fn provide_result(
        &self,
        response: &Response,
        target: Option<&dyn ResultTarget>,
    ) -> Result<(), ProviderError>;
}

fn present(data: Option<&Value>) -> Option<&Value> {
    data.filter(|v| !v.is_null())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBodyProvider;

impl BodyProvider for JsonBodyProvider {
    fn provide_body(&self, data: Option<&Value>) -> Result<Option<EncodedBody>, ProviderError> {
        let Some(data) = present(data) else {
            return Ok(None);
        };
        let bytes = serde_json::to_vec(data)?;
        Ok(Some(EncodedBody {
            content_type: HeaderValue::from_static("application/json"),
            bytes: Bytes::from(bytes),
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResultProvider;

impl ResultProvider for JsonResultProvider {
    fn provide_result(
        &self,
        response: &Response,
        target: Option<&dyn ResultTarget>,
    ) -> Result<(), ProviderError> {
        let Some(target) = target else {
            return Ok(());
        };
        let value: Value = response.json()?;
        target.fill(value)
    }
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

const FORM_SHAPE: &str = "a map of string to list of strings";

/// Flatten `{"k": ["a", "b"]}` into `[("k", "a"), ("k", "b")]`.
fn form_fields(provider: &'static str, data: &Value) -> Result<Vec<(String, String)>, ProviderError> {
    let mismatch = || ProviderError::TypeNotMatch {
        provider,
        expected: FORM_SHAPE,
    };

    let map = data.as_object().ok_or_else(mismatch)?;
    let mut fields = Vec::with_capacity(map.len());
    for (key, values) in map {
        for value in values.as_array().ok_or_else(mismatch)? {
            let value = value.as_str().ok_or_else(mismatch)?;
            fields.push((key.clone(), value.to_owned()));
        }
    }
    Ok(fields)
}

/// Encodes `application/x-www-form-urlencoded` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormBodyProvider;

impl BodyProvider for FormBodyProvider {
    fn provide_body(&self, data: Option<&Value>) -> Result<Option<EncodedBody>, ProviderError> {
        let Some(data) = present(data) else {
            return Ok(None);
        };
        let fields = form_fields("form", data)?;
        let encoded = serde_urlencoded::to_string(&fields)?;
        Ok(Some(EncodedBody {
            content_type: HeaderValue::from_static("application/x-www-form-urlencoded"),
            bytes: Bytes::from(encoded),
        }))
    }
}

/// Encodes `multipart/form-data` bodies made of plain text fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultipartFormBodyProvider;

impl MultipartFormBodyProvider {
    fn boundary() -> String {
        format!("{:032x}", rand::random::<u128>())
    }
}

impl BodyProvider for MultipartFormBodyProvider {
    fn provide_body(&self, data: Option<&Value>) -> Result<Option<EncodedBody>, ProviderError> {
        let Some(data) = present(data) else {
            return Ok(None);
        };
        let fields = form_fields("multipart form", data)?;
        let boundary = Self::boundary();

        let mut body = String::new();
        for (name, value) in &fields {
            body.push_str("--");
            body.push_str(&boundary);
            body.push_str("\r\nContent-Disposition: form-data; name=\"");
            body.push_str(&name.replace('"', "%22"));
            body.push_str("\"\r\n\r\n");
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str("--");
        body.push_str(&boundary);
        body.push_str("--\r\n");

        let content_type = HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
            .map_err(|_| ProviderError::TypeNotMatch {
                provider: "multipart form",
                expected: FORM_SHAPE,
            })?;
        Ok(Some(EncodedBody {
            content_type,
            bytes: Bytes::from(body),
        }))
    }
}

// ---------------------------------------------------------------------------
// Result targets
// ---------------------------------------------------------------------------

/// Shareable typed result target.
///
/// Clones share the same slot: hand one to the operation, keep the other to
/// read the decoded value after the call.
pub struct ResultSlot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> std::fmt::Debug for ResultSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSlot")
            .field("filled", &self.is_filled())
            .finish()
    }
}

impl<T> ResultSlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Take the decoded value out of the slot.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

impl<T: Clone> ResultSlot<T> {
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }
}

impl<T> ResultTarget for ResultSlot<T>
where
    T: DeserializeOwned + Send,
{
    fn fill(&self, value: Value) -> Result<(), ProviderError> {
        let decoded = serde_json::from_value(value)?;
        *self.value.lock() = Some(decoded);
        Ok(())
    }
}
