//! Conduit — descriptor-driven connector core for third-party REST APIs.
//!
//! Services are declared as pure data (base URL, auth strategy tag,
//! transformer tag, templated endpoints); no per-service code exists in the
//! core. Callers connect to a service with an opaque credential payload and
//! then invoke endpoints through the resulting connection id.
//!
//! # Architecture
//!
//! ```text
//! caller
//!   ↓ connect(service_id, auth_config)
//! ┌─────────────────────────────────────────┐
//! │  ServiceCatalog ── descriptor lookup    │
//! │  AuthResolver ──── validate credentials │
//! │  Vault ─────────── seal auth config     │
//! │  ConnectionStore ─ hold the connection  │
//! └─────────────────────────────────────────┘
//!   ↓ invoke(connection_id, endpoint_id, params)
//! ┌─────────────────────────────────────────┐
//! │  EndpointInvoker                        │
//! │  - expand path template                 │
//! │  - merge default/caller query params    │
//! │  - inject credentials (refresh once)    │
//! │  - execute with timeout + backoff       │
//! │  TransformerRegistry ─ normalize 2xx    │
//! └─────────────────────────────────────────┘
//!   ↓
//! NormalizedResult
//! ```
//!
//! # Core Types
//!
//! - [`Service`] / [`EndpointDescriptor`] — declarative API descriptors
//! - [`ServiceCatalog`] — append-only in-memory registry
//! - [`AuthProvider`] / [`AuthResolver`] — closed auth strategy variants
//! - [`ConnectionStore`] — connection lifecycle, per-entry locking
//! - [`EndpointInvoker`] — request construction and execution
//! - [`TransformerRegistry`] — response normalization
//! - [`ConnectorError`] — the full failure taxonomy

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod invoke;
pub mod transform;
pub mod vault;

// Re-export the types most embedders touch
pub use auth::{AuthProvider, AuthResolver, CustomAuthHandler, CustomAuthRegistry};
pub use catalog::{EndpointDescriptor, HttpMethod, Service, ServiceCatalog};
pub use config::RuntimeConfig;
pub use connection::{Connection, ConnectionInfo, ConnectionState, ConnectionStore};
pub use error::{ConnectorError, Result};
pub use invoke::EndpointInvoker;
pub use transform::{NormalizedResult, TransformerRegistry, TransformerTag};
pub use vault::Vault;
