//! Service catalog — declarative descriptors of third-party APIs.
//!
//! A `Service` describes everything the invoker needs to call a remote API:
//! base URL, auth strategy tag, transformer tag, and a set of templated
//! endpoints. Descriptors are pure data; no per-service code exists anywhere
//! in the core. Registration is append-only and in-memory.

use crate::auth::AuthProvider;
use crate::error::{ConnectorError, Result};
use crate::transform::TransformerTag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// HTTP method for an endpoint descriptor. Closed set — descriptors cannot
/// smuggle in arbitrary verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

/// One operation on a service: method, templated path, optional content type
/// for the request body, and default query parameters.
///
/// Path templates contain `{name}` placeholders; every placeholder must be
/// supplied by the caller at invoke time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: HttpMethod,
    pub path: String,
    /// Request body content type for non-GET methods. `None` means JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Query parameters applied unless the caller overrides them.
    #[serde(default)]
    pub default_params: HashMap<String, String>,
}

/// Immutable descriptor of a third-party API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Service {
    /// Unique id, e.g. "weather". Duplicate registration is rejected.
    pub id: String,
    /// Human-readable label shown by embedding UIs.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL all endpoint paths are appended to.
    pub base_url: String,
    /// Which auth strategy validates and injects credentials.
    pub auth_provider: AuthProvider,
    /// Which transformer normalizes successful responses.
    #[serde(default)]
    pub data_transformer: TransformerTag,
    /// Endpoint descriptors keyed by endpoint id (unique within the service).
    pub endpoints: HashMap<String, EndpointDescriptor>,
}

impl Service {
    /// Looks up an endpoint descriptor by id.
    pub fn endpoint(&self, endpoint_id: &str) -> Result<&EndpointDescriptor> {
        self.endpoints
            .get(endpoint_id)
            .ok_or_else(|| ConnectorError::EndpointNotFound {
                service_id: self.id.clone(),
                endpoint_id: endpoint_id.to_string(),
            })
    }
}

/// Startup descriptor file: a list of services under a `services` key.
#[derive(Debug, Deserialize)]
pub struct ServiceManifest {
    pub services: Vec<Service>,
}

/// In-memory registry of service descriptors.
///
/// Read-mostly: populated at startup (or extended dynamically) and consulted
/// on every connect/invoke. Listing preserves registration order.
pub struct ServiceCatalog {
    services: RwLock<Vec<Arc<Service>>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Vec::new()),
        }
    }

    /// Registers a service descriptor. Fails with `DuplicateService` if the
    /// id is already taken — descriptors are never replaced in place.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.iter().any(|s| s.id == service.id) {
            return Err(ConnectorError::DuplicateService(service.id));
        }
        info!(service_id = %service.id, endpoint_count = service.endpoints.len(), "Service registered");
        services.push(Arc::new(service));
        Ok(())
    }

    /// Returns all registered services in registration order.
    pub fn list(&self) -> Vec<Arc<Service>> {
        self.services.read().unwrap().clone()
    }

    /// Returns the service with the given id.
    pub fn get(&self, service_id: &str) -> Result<Arc<Service>> {
        self.services
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == service_id)
            .cloned()
            .ok_or_else(|| ConnectorError::ServiceNotFound(service_id.to_string()))
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new()
    }
}
