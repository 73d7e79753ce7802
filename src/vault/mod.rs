//! Sealed storage for connection auth configs.
//!
//! The caller-supplied `auth_config` map is sealed with AES-256-GCM the
//! moment a connection is created and opened only inside the auth
//! validation/injection path. It is never serialized back to callers; the
//! connection id is the only handle they ever hold.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod encryption;

/// An encrypted auth config payload. Safe to keep on a connection record and
/// to debug-print — both fields are base64 ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedConfig {
    ciphertext: String,
    nonce: String,
}

/// Seals and opens auth config maps with a process-wide master key.
pub struct Vault {
    key: Vec<u8>,
}

impl Vault {
    /// Creates a vault from a base64-encoded 32-byte master key.
    pub fn new(key_base64: &str) -> Result<Self> {
        let key = encryption::decode_key(key_base64)?;
        Ok(Self { key })
    }

    /// Creates a vault with a random key held only in memory. Suitable for
    /// embedders that never restart connections across processes, and tests.
    pub fn ephemeral() -> Self {
        use aes_gcm::aead::{rand_core::RngCore, OsRng};
        let mut key = vec![0u8; encryption::KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Seals an auth config map.
    pub fn seal(&self, auth_config: &HashMap<String, String>) -> Result<SealedConfig> {
        let plaintext =
            serde_json::to_vec(auth_config).context("Failed to serialize auth config")?;
        let (ciphertext, nonce) = encryption::encrypt(&plaintext, &self.key)?;
        Ok(SealedConfig { ciphertext, nonce })
    }

    /// Opens a sealed auth config map.
    pub fn open(&self, sealed: &SealedConfig) -> Result<HashMap<String, String>> {
        let plaintext = encryption::decrypt(&sealed.ciphertext, &sealed.nonce, &self.key)?;
        serde_json::from_slice(&plaintext).context("Sealed payload is not a valid auth config")
    }
}
