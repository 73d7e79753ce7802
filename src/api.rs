//! Connector core HTTP API — JSON surface over the five operations.
//!
//! Routes:
//! - `GET    /api/services` — list registered services
//! - `POST   /api/services` — register a new service descriptor
//! - `GET    /api/services/:service_id` — fetch one descriptor
//! - `GET    /api/connections` — list live connections
//! - `POST   /api/connections` — connect to a service
//! - `DELETE /api/connections/:connection_id` — disconnect (idempotent)
//! - `POST   /api/connections/:connection_id/invoke/:endpoint_id` — invoke
//!
//! Every error body is `{"error": <stable kind>, "message": <text>}`.

use crate::catalog::{Service, ServiceCatalog};
use crate::connection::{ConnectionInfo, ConnectionStore};
use crate::error::ConnectorError;
use crate::invoke::EndpointInvoker;
use crate::transform::NormalizedResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for the connector API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<ServiceCatalog>,
    pub store: Arc<ConnectionStore>,
    pub invoker: Arc<EndpointInvoker>,
}

/// Request body for `POST /api/connections`.
#[derive(Deserialize)]
pub struct ConnectRequest {
    pub service_id: String,
    /// Opaque credential payload. Sealed on arrival; never echoed back.
    #[serde(default)]
    pub auth_config: HashMap<String, String>,
}

/// Request body for the invoke route. All fields optional.
#[derive(Default, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Serialize)]
pub struct RegisterServiceResponse {
    pub service_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn list_services(State(state): State<Arc<ApiState>>) -> Json<Vec<Arc<Service>>> {
    Json(state.catalog.list())
}

async fn get_service(
    State(state): State<Arc<ApiState>>,
    Path(service_id): Path<String>,
) -> Result<Json<Arc<Service>>, AppError> {
    let service = state.catalog.get(&service_id)?;
    Ok(Json(service))
}

async fn register_service(
    State(state): State<Arc<ApiState>>,
    Json(service): Json<Service>,
) -> Result<(StatusCode, Json<RegisterServiceResponse>), AppError> {
    let service_id = service.id.clone();
    state.catalog.register(service)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterServiceResponse { service_id }),
    ))
}

async fn list_connections(State(state): State<Arc<ApiState>>) -> Json<Vec<ConnectionInfo>> {
    Json(state.store.list())
}

async fn connect(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), AppError> {
    let connection = state.store.connect(&req.service_id, req.auth_config).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConnectionInfo::from(connection.as_ref())),
    ))
}

async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Path(connection_id): Path<String>,
) -> StatusCode {
    // Idempotent by contract: unknown ids succeed silently
    state.store.disconnect(&connection_id);
    StatusCode::NO_CONTENT
}

async fn invoke(
    State(state): State<Arc<ApiState>>,
    Path((connection_id, endpoint_id)): Path<(String, String)>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<NormalizedResult>, AppError> {
    let result = state
        .invoker
        .invoke(
            &connection_id,
            &endpoint_id,
            &req.path_params,
            &req.query_params,
            req.body,
        )
        .await?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

struct AppError(ConnectorError);

impl From<ConnectorError> for AppError {
    fn from(e: ConnectorError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConnectorError::ServiceNotFound(_)
            | ConnectorError::ConnectionNotFound(_)
            | ConnectorError::EndpointNotFound { .. } => StatusCode::NOT_FOUND,
            ConnectorError::DuplicateService(_) => StatusCode::CONFLICT,
            ConnectorError::MissingPathParameter(_) => StatusCode::BAD_REQUEST,
            ConnectorError::AuthFailure { .. } => StatusCode::UNAUTHORIZED,
            ConnectorError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ConnectorError::UpstreamError { .. } | ConnectorError::TransformError { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        let body = ErrorResponse {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/services", get(list_services).post(register_service))
        .route("/api/services/:service_id", get(get_service))
        .route("/api/connections", get(list_connections).post(connect))
        .route("/api/connections/:connection_id", delete(disconnect))
        .route(
            "/api/connections/:connection_id/invoke/:endpoint_id",
            post(invoke),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
