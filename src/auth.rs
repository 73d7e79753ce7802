//! Authentication strategies.
//!
//! A service's `auth_provider` tag resolves to two behaviors: a validation
//! step run once at connect time, and an injection step run on every outbound
//! request. Strategies are closed variants — `api-key`, `bearer-token`,
//! `basic` — plus an explicit `custom` case that carries a handler id
//! registered by the embedding application, never reflection-based dispatch.
//!
//! Bearer connections with a refresh token get single-flight refresh: the
//! per-connection token mutex is held across the refresh call, so concurrent
//! invokers block on the one in-flight refresh and reuse its result instead
//! of issuing duplicates.
//!
//! Failure reasons name the missing/invalid field, never the value.

use crate::error::{ConnectorError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Where an api-key credential is placed on the outbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLocation {
    Header,
    Query,
}

/// Auth strategy tag declared on a service descriptor.
///
/// Placement details (header/query param name for `api-key`) live on the
/// descriptor because they are properties of the remote API; the secret
/// itself always arrives in the caller's `auth_config` at connect time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthProvider {
    /// Copies `auth_config["api_key"]` into the named header or query param.
    ApiKey {
        #[serde(rename = "in")]
        location: KeyLocation,
        name: String,
    },
    /// `Authorization: Bearer <token>` from `auth_config["token"]`, with
    /// optional refresh via `refresh_token` + `token_url` (+ `expires_in`).
    BearerToken,
    /// `Authorization: Basic base64(user:pass)` from `username`/`password`.
    Basic,
    /// Delegates both steps to a handler registered under this id.
    Custom { handler: String },
}

/// Mutable bearer token state owned by one connection. Guarded by a
/// per-connection `tokio::sync::Mutex` — the single-flight refresh primitive.
#[derive(Clone, Debug, Default)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token response from an OAuth token refresh endpoint.
#[derive(Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Handler for the `custom` strategy, supplied by the embedding application.
///
/// `validate` runs once at connect time; `inject` runs on every outbound
/// request. Validation reasons must not echo credential values.
#[async_trait]
pub trait CustomAuthHandler: Send + Sync {
    async fn validate(
        &self,
        auth_config: &HashMap<String, String>,
    ) -> std::result::Result<(), String>;

    fn inject(
        &self,
        request: reqwest::RequestBuilder,
        auth_config: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder;
}

/// Registry of custom auth handlers, keyed by the id a service descriptor
/// references.
pub struct CustomAuthRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CustomAuthHandler>>>,
}

impl CustomAuthRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn CustomAuthHandler>) {
        self.handlers.write().unwrap().insert(id.into(), handler);
    }

    fn get(&self, id: &str) -> Result<Arc<dyn CustomAuthHandler>> {
        self.handlers
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ConnectorError::AuthFailure {
                reason: format!("no custom auth handler registered under id '{}'", id),
            })
    }
}

impl Default for CustomAuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves auth provider tags into validation and injection behavior.
pub struct AuthResolver {
    custom: Arc<CustomAuthRegistry>,
    http_client: reqwest::Client,
    refresh_threshold_secs: i64,
}

impl AuthResolver {
    pub fn new(custom: Arc<CustomAuthRegistry>, refresh_threshold_secs: i64) -> Self {
        Self {
            custom,
            http_client: reqwest::Client::new(),
            refresh_threshold_secs,
        }
    }

    /// Connect-time validation. Returns the initial token state for the
    /// connection (empty for non-bearer strategies).
    pub async fn validate(
        &self,
        provider: &AuthProvider,
        auth_config: &HashMap<String, String>,
    ) -> Result<TokenState> {
        match provider {
            AuthProvider::ApiKey { .. } => {
                required(auth_config, "api_key", "api-key")?;
                Ok(TokenState::default())
            }
            AuthProvider::BearerToken => {
                let token = non_empty(auth_config, "token");
                let refresh_token = non_empty(auth_config, "refresh_token");
                if token.is_none() && refresh_token.is_none() {
                    return Err(ConnectorError::AuthFailure {
                        reason: "bearer-token provider requires 'token' or 'refresh_token' in auth config"
                            .to_string(),
                    });
                }

                let expires_at = match auth_config.get("expires_in") {
                    Some(raw) => {
                        let secs = raw.parse::<i64>().map_err(|_| ConnectorError::AuthFailure {
                            reason: "'expires_in' must be an integer number of seconds".to_string(),
                        })?;
                        Some(Utc::now() + chrono::Duration::seconds(secs))
                    }
                    None => None,
                };

                Ok(TokenState {
                    access_token: token,
                    refresh_token,
                    expires_at,
                })
            }
            AuthProvider::Basic => {
                required(auth_config, "username", "basic")?;
                required(auth_config, "password", "basic")?;
                Ok(TokenState::default())
            }
            AuthProvider::Custom { handler } => {
                let handler = self.custom.get(handler)?;
                handler
                    .validate(auth_config)
                    .await
                    .map_err(|reason| ConnectorError::AuthFailure { reason })?;
                Ok(TokenState::default())
            }
        }
    }

    /// Attaches credentials to an outbound request, refreshing the bearer
    /// token first when it is missing or within the expiry threshold.
    pub async fn inject(
        &self,
        provider: &AuthProvider,
        auth_config: &HashMap<String, String>,
        token: &Mutex<TokenState>,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        match provider {
            AuthProvider::ApiKey { location, name } => {
                let key = required(auth_config, "api_key", "api-key")?;
                Ok(match location {
                    KeyLocation::Header => request.header(name.as_str(), key),
                    KeyLocation::Query => request.query(&[(name.as_str(), key.as_str())]),
                })
            }
            AuthProvider::BearerToken => {
                // Holding the mutex across the refresh serializes concurrent
                // refreshes per connection; waiters re-check and find a fresh
                // token instead of refreshing again.
                let mut state = token.lock().await;
                if self.needs_refresh(&state) {
                    self.refresh(&mut state, auth_config).await?;
                }
                let access_token =
                    state
                        .access_token
                        .clone()
                        .ok_or_else(|| ConnectorError::AuthFailure {
                            reason: "no access token available for bearer injection".to_string(),
                        })?;
                drop(state);
                Ok(request.header(AUTHORIZATION, format!("Bearer {}", access_token)))
            }
            AuthProvider::Basic => {
                let username = required(auth_config, "username", "basic")?;
                let password = required(auth_config, "password", "basic")?;
                let encoded = BASE64.encode(format!("{}:{}", username, password));
                Ok(request.header(AUTHORIZATION, format!("Basic {}", encoded)))
            }
            AuthProvider::Custom { handler } => {
                let handler = self.custom.get(handler)?;
                Ok(handler.inject(request, auth_config))
            }
        }
    }

    /// Returns true if the bearer token should be refreshed before use.
    ///
    /// Refresh requires a refresh token and triggers when the access token is
    /// absent or expires within the threshold. Static tokens (no refresh
    /// token, or no expiry) are unaffected.
    fn needs_refresh(&self, state: &TokenState) -> bool {
        if state.refresh_token.is_none() {
            return false;
        }
        match (&state.access_token, &state.expires_at) {
            (None, _) => true,
            (Some(_), Some(expires_at)) => {
                let threshold =
                    Utc::now() + chrono::Duration::seconds(self.refresh_threshold_secs);
                *expires_at <= threshold
            }
            (Some(_), None) => false,
        }
    }

    /// Exchanges the refresh token at the configured token URL.
    ///
    /// POSTs `grant_type=refresh_token` form data; includes `client_id` /
    /// `client_secret` from the auth config when present. On success the
    /// token state is updated in place, keeping the previous refresh token if
    /// the provider did not rotate it.
    async fn refresh(
        &self,
        state: &mut TokenState,
        auth_config: &HashMap<String, String>,
    ) -> Result<()> {
        let token_url =
            auth_config
                .get("token_url")
                .ok_or_else(|| ConnectorError::AuthFailure {
                    reason: "token refresh required but no 'token_url' in auth config".to_string(),
                })?;
        let refresh_token =
            state
                .refresh_token
                .clone()
                .ok_or_else(|| ConnectorError::AuthFailure {
                    reason: "token refresh required but no refresh token held".to_string(),
                })?;

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token);
        if let Some(client_id) = auth_config.get("client_id") {
            form.insert("client_id", client_id.clone());
        }
        if let Some(client_secret) = auth_config.get("client_secret") {
            form.insert("client_secret", client_secret.clone());
        }

        info!("Refreshing bearer token");

        let response = self
            .http_client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ConnectorError::AuthFailure {
                reason: format!("token refresh request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Token refresh rejected");
            return Err(ConnectorError::AuthFailure {
                reason: format!("token refresh rejected with status {}", status),
            });
        }

        let token_response: TokenRefreshResponse =
            response
                .json()
                .await
                .map_err(|_| ConnectorError::AuthFailure {
                    reason: "token refresh response could not be parsed".to_string(),
                })?;

        state.expires_at = token_response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        // Keep the existing refresh token if the provider did not rotate it
        if let Some(rotated) = token_response.refresh_token {
            state.refresh_token = Some(rotated);
        }
        state.access_token = Some(token_response.access_token);

        info!("Bearer token refreshed");
        Ok(())
    }
}

/// Fetches a required, non-empty auth config value or fails with a reason
/// that names the field, never the value.
fn required<'a>(
    auth_config: &'a HashMap<String, String>,
    key: &str,
    provider: &str,
) -> Result<&'a String> {
    auth_config
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConnectorError::AuthFailure {
            reason: format!("{} provider requires '{}' in auth config", provider, key),
        })
}

fn non_empty(auth_config: &HashMap<String, String>, key: &str) -> Option<String> {
    auth_config.get(key).filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AuthResolver {
        AuthResolver::new(Arc::new(CustomAuthRegistry::new()), 90)
    }

    fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // --- validate ---

    #[tokio::test]
    async fn test_validate_api_key_requires_key() {
        let r = resolver();
        let provider = AuthProvider::ApiKey {
            location: KeyLocation::Header,
            name: "X-API-Key".to_string(),
        };

        assert!(r
            .validate(&provider, &config(&[("api_key", "sk-123")]))
            .await
            .is_ok());

        let err = r.validate(&provider, &config(&[])).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        assert!(err.to_string().contains("'api_key'"));

        // Empty value counts as missing
        let err = r
            .validate(&provider, &config(&[("api_key", "")]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
    }

    #[tokio::test]
    async fn test_validate_bearer_accepts_token_or_refresh_token() {
        let r = resolver();

        let state = r
            .validate(&AuthProvider::BearerToken, &config(&[("token", "tok")]))
            .await
            .unwrap();
        assert_eq!(state.access_token, Some("tok".to_string()));
        assert!(state.refresh_token.is_none());

        let state = r
            .validate(
                &AuthProvider::BearerToken,
                &config(&[("refresh_token", "ref"), ("token_url", "https://x/token")]),
            )
            .await
            .unwrap();
        assert!(state.access_token.is_none());
        assert_eq!(state.refresh_token, Some("ref".to_string()));

        let err = r
            .validate(&AuthProvider::BearerToken, &config(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
    }

    #[tokio::test]
    async fn test_validate_bearer_parses_expires_in() {
        let r = resolver();
        let state = r
            .validate(
                &AuthProvider::BearerToken,
                &config(&[("token", "tok"), ("expires_in", "3600")]),
            )
            .await
            .unwrap();
        let expires_at = state.expires_at.expect("expires_at should be set");
        assert!(expires_at > Utc::now() + chrono::Duration::seconds(3500));

        let err = r
            .validate(
                &AuthProvider::BearerToken,
                &config(&[("token", "tok"), ("expires_in", "soon")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
    }

    #[tokio::test]
    async fn test_validate_basic_requires_both_fields() {
        let r = resolver();
        assert!(r
            .validate(
                &AuthProvider::Basic,
                &config(&[("username", "u"), ("password", "p")])
            )
            .await
            .is_ok());

        let err = r
            .validate(&AuthProvider::Basic, &config(&[("username", "u")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'password'"));
    }

    #[tokio::test]
    async fn test_validate_errors_never_leak_values() {
        let r = resolver();
        let secret = "hunter2-super-secret";
        let err = r
            .validate(&AuthProvider::Basic, &config(&[("username", secret)]))
            .await
            .unwrap_err();
        assert!(!err.to_string().contains(secret));
    }

    #[tokio::test]
    async fn test_validate_custom_unknown_handler() {
        let r = resolver();
        let err = r
            .validate(
                &AuthProvider::Custom {
                    handler: "hmac-v1".to_string(),
                },
                &config(&[]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        assert!(err.to_string().contains("'hmac-v1'"));
    }

    struct StampHandler;

    #[async_trait]
    impl CustomAuthHandler for StampHandler {
        async fn validate(
            &self,
            auth_config: &HashMap<String, String>,
        ) -> std::result::Result<(), String> {
            if auth_config.contains_key("stamp") {
                Ok(())
            } else {
                Err("custom handler requires 'stamp' in auth config".to_string())
            }
        }

        fn inject(
            &self,
            request: reqwest::RequestBuilder,
            auth_config: &HashMap<String, String>,
        ) -> reqwest::RequestBuilder {
            request.header("X-Stamp", auth_config["stamp"].as_str())
        }
    }

    #[tokio::test]
    async fn test_validate_custom_delegates() {
        let registry = Arc::new(CustomAuthRegistry::new());
        registry.register("stamp-v1", Arc::new(StampHandler));
        let r = AuthResolver::new(registry, 90);
        let provider = AuthProvider::Custom {
            handler: "stamp-v1".to_string(),
        };

        assert!(r
            .validate(&provider, &config(&[("stamp", "abc")]))
            .await
            .is_ok());

        let err = r.validate(&provider, &config(&[])).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        assert!(err.to_string().contains("'stamp'"));
    }

    // --- needs_refresh ---

    fn state(
        access: Option<&str>,
        refresh: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> TokenState {
        TokenState {
            access_token: access.map(str::to_string),
            refresh_token: refresh.map(str::to_string),
            expires_at,
        }
    }

    #[test]
    fn test_needs_refresh_no_refresh_token() {
        let r = resolver();
        assert!(!r.needs_refresh(&state(
            Some("tok"),
            None,
            Some(Utc::now() + chrono::Duration::seconds(30))
        )));
    }

    #[test]
    fn test_needs_refresh_no_expiry() {
        let r = resolver();
        assert!(!r.needs_refresh(&state(Some("tok"), Some("ref"), None)));
    }

    #[test]
    fn test_needs_refresh_far_future() {
        let r = resolver();
        assert!(!r.needs_refresh(&state(
            Some("tok"),
            Some("ref"),
            Some(Utc::now() + chrono::Duration::hours(2))
        )));
    }

    #[test]
    fn test_needs_refresh_near_expiry() {
        let r = resolver();
        assert!(r.needs_refresh(&state(
            Some("tok"),
            Some("ref"),
            Some(Utc::now() + chrono::Duration::seconds(30))
        )));
    }

    #[test]
    fn test_needs_refresh_missing_access_token() {
        let r = resolver();
        assert!(r.needs_refresh(&state(None, Some("ref"), None)));
    }

    // --- refresh ---

    #[tokio::test]
    async fn test_refresh_success_keeps_unrotated_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new_token","expires_in":3600}"#)
            .create_async()
            .await;

        let r = resolver();
        let mut token_state = state(
            Some("old_token"),
            Some("my_refresh"),
            Some(Utc::now() + chrono::Duration::seconds(30)),
        );
        let cfg = config(&[("token_url", &format!("{}/token", server.url()))]);

        r.refresh(&mut token_state, &cfg).await.unwrap();

        assert_eq!(token_state.access_token, Some("new_token".to_string()));
        // Provider did not rotate — original refresh token must be kept
        assert_eq!(token_state.refresh_token, Some("my_refresh".to_string()));
        assert!(token_state.expires_at.unwrap() > Utc::now());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejection_leaves_state_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let r = resolver();
        let mut token_state = state(Some("old_token"), Some("expired_refresh"), None);
        let cfg = config(&[("token_url", &format!("{}/token", server.url()))]);

        let err = r.refresh(&mut token_state, &cfg).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        // Failed refresh must not leak the refresh token in the reason
        assert!(!err.to_string().contains("expired_refresh"));
        assert_eq!(token_state.access_token, Some("old_token".to_string()));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_token_url_fails() {
        let r = resolver();
        let mut token_state = state(None, Some("ref"), None);
        let err = r.refresh(&mut token_state, &config(&[])).await.unwrap_err();
        assert_eq!(err.kind(), "auth_failure");
        assert!(err.to_string().contains("'token_url'"));
    }
}
