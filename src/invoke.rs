//! Endpoint invocation.
//!
//! Resolves a connection + endpoint descriptor into an outbound request:
//! expands the path template, merges default and caller query parameters,
//! serializes the body per content type, injects credentials, and executes
//! with a bounded timeout and bounded exponential backoff. Only
//! transport-level failures are retried; an answered request is never
//! replayed.

use crate::auth::AuthResolver;
use crate::catalog::{HttpMethod, ServiceCatalog};
use crate::config::RuntimeConfig;
use crate::connection::ConnectionStore;
use crate::error::{ConnectorError, Result};
use crate::transform::{NormalizedResult, TransformerRegistry};
use crate::vault::Vault;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Pre-serialized request body, computed once and reused across retries.
enum RequestBody {
    None,
    Json(Value),
    Form(String),
}

/// Builds and executes requests against catalogued services.
pub struct EndpointInvoker {
    catalog: Arc<ServiceCatalog>,
    store: Arc<ConnectionStore>,
    auth: Arc<AuthResolver>,
    vault: Arc<Vault>,
    transformers: Arc<TransformerRegistry>,
    http_client: reqwest::Client,
    config: RuntimeConfig,
}

impl EndpointInvoker {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        store: Arc<ConnectionStore>,
        auth: Arc<AuthResolver>,
        vault: Arc<Vault>,
        transformers: Arc<TransformerRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            auth,
            vault,
            transformers,
            http_client: reqwest::Client::new(),
            config,
        }
    }

    /// Executes one endpoint invocation and returns the normalized result.
    ///
    /// Lookup failures surface immediately; transport failures are retried
    /// with exponential backoff before becoming `UpstreamTimeout`; a non-2xx
    /// answer becomes `UpstreamError` without touching the transformer.
    pub async fn invoke(
        &self,
        connection_id: &str,
        endpoint_id: &str,
        path_params: &HashMap<String, String>,
        query_params: &HashMap<String, String>,
        body: Option<Value>,
    ) -> Result<NormalizedResult> {
        // Resolve connection, service, endpoint — the connection record is
        // held for the whole call, so a concurrent disconnect lets us drain.
        let connection = self.store.get(connection_id)?;
        let service = self.catalog.get(&connection.service_id)?;
        let endpoint = service.endpoint(endpoint_id)?;

        let path = expand_path(&endpoint.path, path_params)?;
        let query = merge_query(&endpoint.default_params, query_params);
        let url = join_url(&service.base_url, &path);

        // GET ignores any supplied body rather than failing
        let request_body = if endpoint.method == HttpMethod::Get {
            RequestBody::None
        } else {
            match body {
                None => RequestBody::None,
                Some(value) => match endpoint.content_type.as_deref() {
                    Some(FORM_CONTENT_TYPE) => RequestBody::Form(form_encode(&value)),
                    _ => RequestBody::Json(value),
                },
            }
        };

        let auth_config =
            self.vault
                .open(connection.sealed_config())
                .map_err(|_| ConnectorError::AuthFailure {
                    reason: "sealed auth config could not be opened".to_string(),
                })?;

        debug!(
            connection_id = %connection_id,
            endpoint_id = %endpoint_id,
            method = ?endpoint.method,
            "Invoking endpoint"
        );

        let mut attempt = 0u32;
        let (status, raw) = loop {
            attempt += 1;

            let mut builder = self
                .http_client
                .request(endpoint.method.as_reqwest(), &url)
                .timeout(Duration::from_secs(self.config.request_timeout_secs));
            if !query.is_empty() {
                builder = builder.query(&query);
            }
            builder = match &request_body {
                RequestBody::None => builder,
                RequestBody::Json(value) => builder.json(value),
                RequestBody::Form(encoded) => builder
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .body(encoded.clone()),
            };

            // Injection may refresh the bearer token; single-flight per
            // connection is enforced inside the resolver.
            builder = self
                .auth
                .inject(&service.auth_provider, &auth_config, connection.token(), builder)
                .await?;

            match self.execute_once(builder).await {
                Ok(result) => break result,
                Err(e) if attempt < self.config.max_attempts => {
                    let delay = backoff_delay(self.config.backoff_base_ms, attempt);
                    warn!(
                        connection_id = %connection_id,
                        endpoint_id = %endpoint_id,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Transport failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection_id,
                        endpoint_id = %endpoint_id,
                        attempts = attempt,
                        error = %e,
                        "Transport failure, retries exhausted"
                    );
                    return Err(ConnectorError::UpstreamTimeout { attempts: attempt });
                }
            }
        };

        if !(200..300).contains(&status) {
            // The upstream answered; surface it untransformed and unretried
            return Err(ConnectorError::UpstreamError {
                status,
                body: String::from_utf8_lossy(&raw).into_owned(),
            });
        }

        self.transformers
            .apply(&service.data_transformer, &service.id, endpoint_id, &raw)
    }

    /// One attempt: send and read the full body. Any transport error (connect
    /// failure, timeout, truncated body) is returned for retry classification.
    async fn execute_once(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<(u16, Vec<u8>), reqwest::Error> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let raw = response.bytes().await?.to_vec();
        Ok((status, raw))
    }
}

/// Expands `{name}` placeholders in a path template. Every placeholder must
/// be present in `params` (extras are ignored); substituted values are
/// percent-encoded, so no brace can survive expansion.
pub fn expand_path(template: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| ConnectorError::MissingPathParameter(after.to_string()))?;
        let name = &after[..end];
        let value = params
            .get(name)
            .ok_or_else(|| ConnectorError::MissingPathParameter(name.to_string()))?;
        out.push_str(&urlencoding::encode(value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Merges default query parameters with caller-supplied ones; the caller wins
/// on key collision and unknown keys pass through. BTreeMap keeps the wire
/// order deterministic.
pub fn merge_query(
    defaults: &HashMap<String, String>,
    caller: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = defaults.clone().into_iter().collect();
    for (k, v) in caller {
        merged.insert(k.clone(), v.clone());
    }
    merged.into_iter().collect()
}

/// Form-encodes the top level of a JSON object. Strings are taken verbatim,
/// other scalars via their JSON rendering, nulls are skipped, and nested
/// values are carried as their JSON text.
fn form_encode(body: &Value) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Value::Object(map) = body {
        for (key, value) in map {
            let rendered = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((key.clone(), rendered));
        }
    }
    serde_urlencoded::to_string(&pairs).unwrap_or_default()
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Exponential backoff from the configured base, doubling per attempt, with
/// up to 100ms of uniform jitter.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = base_ms.saturating_mul(1u64 << exponent);
    let jitter = rand::thread_rng().gen_range(0..=100);
    Duration::from_millis(backoff + jitter)
}
