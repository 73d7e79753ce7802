use serde::{Deserialize, Serialize};

/// Tunables for outbound invocation and token refresh. The upstream contract
/// leaves these unspecified, so they are conservative fixed defaults that can
/// be overridden per deployment via environment variables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-call HTTP timeout in seconds. Exceeding it cancels the in-flight
    /// request and counts as a transient failure.
    pub request_timeout_secs: u64,
    /// Total attempts per invocation (first try + retries).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts, in milliseconds.
    /// Each attempt doubles it; up to 100ms of uniform jitter is added.
    pub backoff_base_ms: u64,
    /// Bearer tokens are refreshed when expiry is within this many seconds.
    pub refresh_threshold_secs: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 200,
            refresh_threshold_secs: 90,
        }
    }
}

impl RuntimeConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CONDUIT_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.request_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("CONDUIT_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_attempts = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("CONDUIT_BACKOFF_BASE_MS") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.backoff_base_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CONDUIT_REFRESH_THRESHOLD_SECS") {
            if let Ok(n) = v.parse::<i64>() {
                cfg.refresh_threshold_secs = n;
            }
        }

        cfg
    }
}
