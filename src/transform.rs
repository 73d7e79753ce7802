//! Response normalization.
//!
//! Each service declares a transformer tag; the registry maps it to a pure
//! function from raw response bytes to the canonical `NormalizedResult`
//! envelope. `passthrough` and `json` are built in; `custom` resolves into a
//! function the embedding application registered by id.
//!
//! Transformers run only on 2xx responses — error bodies are surfaced raw.

use crate::error::{ConnectorError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Which normalization a service's responses go through. Closed set plus an
/// explicit escape hatch carrying a handler id, never open-ended dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransformerTag {
    /// Raw body carried as a UTF-8 string, untouched.
    Passthrough,
    /// Body parsed as JSON.
    Json,
    /// Delegates to a transformer registered by the embedding application.
    Custom { id: String },
}

impl Default for TransformerTag {
    fn default() -> Self {
        TransformerTag::Passthrough
    }
}

/// Canonical result shape returned by every successful invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub service_id: String,
    pub endpoint_id: String,
    /// When the response was received (epoch milliseconds).
    pub fetched_at: i64,
    pub data: Value,
}

/// A caller-registered pure normalizer: raw bytes in, canonical JSON out.
/// Errors are plain reason strings; the registry wraps them with endpoint
/// context.
pub type CustomTransformFn =
    dyn Fn(&[u8]) -> std::result::Result<Value, String> + Send + Sync;

/// Maps transformer tags to normalization functions.
pub struct TransformerRegistry {
    custom: RwLock<HashMap<String, Arc<CustomTransformFn>>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a custom transformer under an id. Replaces any previous
    /// registration for the same id.
    pub fn register_custom(&self, id: impl Into<String>, f: Arc<CustomTransformFn>) {
        self.custom.write().unwrap().insert(id.into(), f);
    }

    /// Applies the tagged transformer to a raw 2xx response body.
    pub fn apply(
        &self,
        tag: &TransformerTag,
        service_id: &str,
        endpoint_id: &str,
        raw: &[u8],
    ) -> Result<NormalizedResult> {
        let data = match tag {
            TransformerTag::Passthrough => match String::from_utf8(raw.to_vec()) {
                Ok(text) => Value::String(text),
                Err(_) => {
                    return Err(self.transform_error(endpoint_id, raw, "response is not valid UTF-8"))
                }
            },
            TransformerTag::Json => serde_json::from_slice(raw)
                .map_err(|e| self.transform_error(endpoint_id, raw, &e.to_string()))?,
            TransformerTag::Custom { id } => {
                let f = self.custom.read().unwrap().get(id).cloned().ok_or_else(|| {
                    self.transform_error(
                        endpoint_id,
                        raw,
                        &format!("no custom transformer registered under id '{}'", id),
                    )
                })?;
                f(raw).map_err(|reason| self.transform_error(endpoint_id, raw, &reason))?
            }
        };

        Ok(NormalizedResult {
            service_id: service_id.to_string(),
            endpoint_id: endpoint_id.to_string(),
            fetched_at: Utc::now().timestamp_millis(),
            data,
        })
    }

    fn transform_error(&self, endpoint_id: &str, raw: &[u8], reason: &str) -> ConnectorError {
        ConnectorError::TransformError {
            endpoint_id: endpoint_id.to_string(),
            byte_len: raw.len(),
            reason: reason.to_string(),
        }
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
