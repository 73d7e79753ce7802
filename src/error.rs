//! Error taxonomy for the connector core.
//!
//! Every failed operation surfaces one of these kinds — callers never get a
//! bare boolean or an opaque string. The `kind()` strings are stable and are
//! what the HTTP surface returns in the `error` field.
//!
//! Retry policy lives with the kinds: lookup errors (caller mistakes) are
//! surfaced immediately; transport failures are retried by the invoker before
//! becoming `UpstreamTimeout`; `UpstreamError` and `TransformError` are never
//! retried — the upstream answered, and replaying a non-idempotent call risks
//! duplication.
//!
//! No variant ever carries auth config contents in its message.

use thiserror::Error;

/// Failure kinds for catalog, connection, and invocation operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The service id is not registered in the catalog.
    #[error("service '{0}' is not registered")]
    ServiceNotFound(String),

    /// A service with this id is already registered (registration is append-only).
    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    /// The connection id is unknown or already disconnected.
    #[error("connection '{0}' does not exist or was disconnected")]
    ConnectionNotFound(String),

    /// The endpoint id is not defined on the resolved service.
    #[error("endpoint '{endpoint_id}' is not defined on service '{service_id}'")]
    EndpointNotFound {
        service_id: String,
        endpoint_id: String,
    },

    /// Credentials were rejected at connect time, or a token refresh failed.
    /// The reason never contains the credential value itself.
    #[error("authentication failed: {reason}")]
    AuthFailure { reason: String },

    /// A `{name}` placeholder in the endpoint path template was not supplied.
    #[error("path template requires parameter '{0}'")]
    MissingPathParameter(String),

    /// Transport-level failure that persisted through the bounded retry loop.
    #[error("upstream request failed after {attempts} attempts")]
    UpstreamTimeout { attempts: u32 },

    /// The upstream service answered with a non-2xx status. Carries the raw
    /// body so the caller can decide what to do; never retried here.
    #[error("upstream returned status {status}")]
    UpstreamError { status: u16, body: String },

    /// The response transformer could not normalize an otherwise-successful
    /// response. Endpoint id and byte length are enough to diagnose without
    /// logging the credential-bearing request.
    #[error("failed to normalize {byte_len} byte response from endpoint '{endpoint_id}': {reason}")]
    TransformError {
        endpoint_id: String,
        byte_len: usize,
        reason: String,
    },
}

impl ConnectorError {
    /// Stable machine-readable kind string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::ServiceNotFound(_) => "service_not_found",
            ConnectorError::DuplicateService(_) => "duplicate_service",
            ConnectorError::ConnectionNotFound(_) => "connection_not_found",
            ConnectorError::EndpointNotFound { .. } => "endpoint_not_found",
            ConnectorError::AuthFailure { .. } => "auth_failure",
            ConnectorError::MissingPathParameter(_) => "missing_path_parameter",
            ConnectorError::UpstreamTimeout { .. } => "upstream_timeout",
            ConnectorError::UpstreamError { .. } => "upstream_error",
            ConnectorError::TransformError { .. } => "transform_error",
        }
    }
}

/// Result alias used throughout the connector core.
pub type Result<T> = std::result::Result<T, ConnectorError>;
