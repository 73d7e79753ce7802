//! AES-256-GCM primitives for sealing auth config payloads.
//!
//! Every seal operation uses a fresh random nonce. The master key is 32 bytes
//! and arrives base64-encoded from the environment; it lives in memory only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Key size in bytes (256 bits).
pub(crate) const KEY_SIZE: usize = 32;

/// Nonce size in bytes (96 bits, standard for GCM).
const NONCE_SIZE: usize = 12;

/// Decodes and validates a base64 master key. Must decode to exactly 32 bytes.
pub(crate) fn decode_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64)
        .context("Failed to decode base64 seal key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Seal key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Encrypts a payload with a random nonce. Returns base64 (ciphertext, nonce).
pub(crate) fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<(String, String)> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Seal key must be {} bytes", KEY_SIZE));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Random nonce, never reused
    let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext_bytes = cipher
        .encrypt(&nonce_bytes, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok((BASE64.encode(&ciphertext_bytes), BASE64.encode(nonce_bytes)))
}

/// Decrypts a sealed payload. Fails on a wrong key, corrupted data, or
/// tampering (GCM is authenticated).
pub(crate) fn decrypt(ciphertext: &str, nonce: &str, key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Seal key must be {} bytes", KEY_SIZE));
    }

    let ciphertext_bytes = BASE64
        .decode(ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce_bytes = BASE64.decode(nonce).context("Failed to decode nonce")?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext_bytes.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))
}
