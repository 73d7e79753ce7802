//! Connection lifecycle.
//!
//! A connection is an authenticated binding between a caller and one service:
//! created only by a successful `connect`, mutated only by token refresh and
//! `disconnect`, removed only by explicit `disconnect` — never expired
//! implicitly. The store is a DashMap, so operations on distinct connections
//! never contend and removal is atomic with respect to concurrent lookups:
//! an invoke that resolved its record before a disconnect drains to
//! completion, one issued after sees `ConnectionNotFound`.

use crate::auth::{AuthResolver, TokenState};
use crate::catalog::ServiceCatalog;
use crate::error::{ConnectorError, Result};
use crate::vault::{SealedConfig, Vault};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection lifecycle states.
///
/// `Pending → Connected` on successful auth validation, `Pending → Failed`
/// otherwise (terminal — retrying means a fresh `connect` and a fresh id).
/// `Connected → Disconnected` on explicit disconnect, also terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Pending,
    Connected,
    Failed,
    Disconnected,
}

/// An authenticated binding to one service.
///
/// The auth config is sealed at creation and never serialized back out; the
/// token state is the only mutable credential material, guarded by its own
/// mutex for single-flight refresh.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub service_id: String,
    pub connected_at: DateTime<Utc>,
    state: RwLock<ConnectionState>,
    sealed_config: SealedConfig,
    token: Mutex<TokenState>,
}

impl Connection {
    fn pending(service_id: String, sealed_config: SealedConfig, token: TokenState) -> Self {
        Self {
            // v7 ids are time-ordered, so listing sorts naturally
            id: Uuid::now_v7().to_string(),
            service_id,
            connected_at: Utc::now(),
            state: RwLock::new(ConnectionState::Pending),
            sealed_config,
            token: Mutex::new(token),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    pub fn sealed_config(&self) -> &SealedConfig {
        &self.sealed_config
    }

    pub fn token(&self) -> &Mutex<TokenState> {
        &self.token
    }
}

/// Public view of a connection. Deliberately excludes anything derived from
/// the auth config.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub service_id: String,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
}

impl From<&Connection> for ConnectionInfo {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id.clone(),
            service_id: conn.service_id.clone(),
            state: conn.state(),
            connected_at: conn.connected_at,
        }
    }
}

/// Owns all live connections and their lifecycle.
pub struct ConnectionStore {
    connections: DashMap<String, Arc<Connection>>,
    catalog: Arc<ServiceCatalog>,
    auth: Arc<AuthResolver>,
    vault: Arc<Vault>,
}

impl ConnectionStore {
    pub fn new(catalog: Arc<ServiceCatalog>, auth: Arc<AuthResolver>, vault: Arc<Vault>) -> Self {
        Self {
            connections: DashMap::new(),
            catalog,
            auth,
            vault,
        }
    }

    /// Authenticates against a service and stores a new connection.
    ///
    /// Fails with `ServiceNotFound` for an unknown service id and
    /// `AuthFailure` when the strategy rejects the credentials; a failed
    /// attempt is never stored.
    pub async fn connect(
        &self,
        service_id: &str,
        auth_config: HashMap<String, String>,
    ) -> Result<Arc<Connection>> {
        let service = self.catalog.get(service_id)?;

        let sealed = self
            .vault
            .seal(&auth_config)
            .map_err(|_| ConnectorError::AuthFailure {
                reason: "auth config could not be sealed".to_string(),
            })?;

        let connection = Connection::pending(service.id.clone(), sealed, TokenState::default());

        let token = match self.auth.validate(&service.auth_provider, &auth_config).await {
            Ok(token) => token,
            Err(e) => {
                connection.set_state(ConnectionState::Failed);
                warn!(service_id = %service.id, "Connection attempt failed auth validation");
                return Err(e);
            }
        };
        *connection.token.lock().await = token;
        connection.set_state(ConnectionState::Connected);

        let connection = Arc::new(connection);
        self.connections
            .insert(connection.id.clone(), Arc::clone(&connection));

        info!(
            connection_id = %connection.id,
            service_id = %connection.service_id,
            "Connection established"
        );
        Ok(connection)
    }

    /// Resolves a live connection. Absent or disconnected ids fail with
    /// `ConnectionNotFound`.
    pub fn get(&self, connection_id: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ConnectorError::ConnectionNotFound(connection_id.to_string()))
    }

    /// Removes a connection. Idempotent — disconnecting an unknown or
    /// already-disconnected id succeeds silently, which keeps cleanup races
    /// harmless. In-flight invocations holding the record drain to
    /// completion; new ones fail `ConnectionNotFound`.
    pub fn disconnect(&self, connection_id: &str) {
        match self.connections.remove(connection_id) {
            Some((_, connection)) => {
                connection.set_state(ConnectionState::Disconnected);
                info!(connection_id = %connection_id, "Connection disconnected");
            }
            None => {
                debug!(connection_id = %connection_id, "Disconnect for unknown connection ignored");
            }
        }
    }

    /// Lists live connections, oldest first.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo::from(entry.value().as_ref()))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthProvider, CustomAuthRegistry, KeyLocation};
    use crate::catalog::{EndpointDescriptor, HttpMethod, Service};
    use crate::transform::TransformerTag;

    fn make_store() -> ConnectionStore {
        let catalog = Arc::new(ServiceCatalog::new());
        catalog
            .register(Service {
                id: "weather".to_string(),
                name: "Weather".to_string(),
                description: String::new(),
                base_url: "https://api.weather.example".to_string(),
                auth_provider: AuthProvider::ApiKey {
                    location: KeyLocation::Header,
                    name: "X-API-Key".to_string(),
                },
                data_transformer: TransformerTag::Json,
                endpoints: HashMap::from([(
                    "current".to_string(),
                    EndpointDescriptor {
                        method: HttpMethod::Get,
                        path: "/v1/{city}/now".to_string(),
                        content_type: None,
                        default_params: HashMap::new(),
                    },
                )]),
            })
            .unwrap();

        let auth = Arc::new(AuthResolver::new(Arc::new(CustomAuthRegistry::new()), 90));
        ConnectionStore::new(catalog, auth, Arc::new(Vault::ephemeral()))
    }

    fn api_key_config() -> HashMap<String, String> {
        HashMap::from([("api_key".to_string(), "sk-123".to_string())])
    }

    #[tokio::test]
    async fn test_connect_success() {
        let store = make_store();
        let conn = store.connect("weather", api_key_config()).await.unwrap();

        assert_eq!(conn.service_id, "weather");
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(store.get(&conn.id).is_ok());
    }

    #[tokio::test]
    async fn test_connect_unknown_service() {
        let store = make_store();
        let err = store.connect("ghost", api_key_config()).await.unwrap_err();
        assert_eq!(err.kind(), "service_not_found");
    }

    #[tokio::test]
    async fn test_connect_bad_credentials_not_stored() {
        let store = make_store();
        let err = store.connect("weather", HashMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_two_connects_are_independent() {
        let store = make_store();
        let a = store.connect("weather", api_key_config()).await.unwrap();
        let b = store.connect("weather", api_key_config()).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.list().len(), 2);

        // Dropping one leaves the other live
        store.disconnect(&a.id);
        assert!(store.get(&a.id).is_err());
        assert!(store.get(&b.id).is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let store = make_store();
        let conn = store.connect("weather", api_key_config()).await.unwrap();

        store.disconnect(&conn.id);
        store.disconnect(&conn.id); // second call is a no-op, not an error
        store.disconnect("never-existed"); // unknown id is a no-op too

        let err = store.get(&conn.id).unwrap_err();
        assert_eq!(err.kind(), "connection_not_found");
    }

    #[tokio::test]
    async fn test_drained_record_sees_disconnected_state() {
        let store = make_store();
        let conn = store.connect("weather", api_key_config()).await.unwrap();

        // Simulates an in-flight invoke holding the record across a disconnect
        let held = store.get(&conn.id).unwrap();
        store.disconnect(&conn.id);

        assert_eq!(held.state(), ConnectionState::Disconnected);
        assert_eq!(held.service_id, "weather");
    }

    #[tokio::test]
    async fn test_list_excludes_sealed_config() {
        let store = make_store();
        store.connect("weather", api_key_config()).await.unwrap();

        let listed = serde_json::to_string(&store.list()).unwrap();
        assert!(!listed.contains("sk-123"));
        assert!(!listed.contains("api_key"));
        assert!(!listed.contains("sealed"));
    }
}
