//! Cryptographic utilities for the persisted session cache.
//!
//! The session (access and refresh tokens) is written to the `app_config` table.
//! When `SESSION_ENCRYPTION_KEY` is configured it is sealed with AES-256-GCM first.

use aes_gcm::{
    aead::{generic_array::typenum::U12, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use log::debug;

/// The length of the nonce in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

/// AES-256-GCM cipher built from a 32-byte hex key.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; 32],
}

impl SessionCipher {
    /// Parses a key encoded as a 64-character hex string.
    ///
    /// # Returns
    ///
    /// - `Ok(SessionCipher)`: If the key is valid
    /// - `Err`: If the key is invalid hex or not exactly 32 bytes
    pub fn from_hex(key_hex: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let key_bytes = hex::decode(key_hex.trim()).map_err(|e| {
            format!(
                "key is not valid hex: {}. Generate a key with: generate_session_key",
                e
            )
        })?;

        if key_bytes.len() != 32 {
            return Err(format!(
                "key must be exactly 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )
            .into());
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        Ok(Self { key })
    }

    /// Encrypts a value.
    ///
    /// The output format is hex of: nonce (12 bytes) || ciphertext || auth_tag
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| format!("Invalid key: {}", e))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| format!("Failed to generate random nonce: {}", e))?;
        let nonce: Nonce<U12> = nonce_bytes.into();

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| format!("Encryption failed: {}", e))?;

        let mut result = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        debug!("Session encrypted successfully");
        Ok(hex::encode(result))
    }

    /// Decrypts a value produced by [`SessionCipher::encrypt`].
    pub fn decrypt(&self, encrypted_hex: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| format!("Invalid key: {}", e))?;

        let encrypted_bytes = hex::decode(encrypted_hex)
            .map_err(|e| format!("Invalid hex in encrypted session: {}", e))?;

        if encrypted_bytes.len() < NONCE_LENGTH {
            return Err("Encrypted session is too short".into());
        }

        let (nonce_bytes, ciphertext) = encrypted_bytes.split_at(NONCE_LENGTH);
        let nonce_array: [u8; NONCE_LENGTH] =
            nonce_bytes.try_into().map_err(|_| "Invalid nonce length")?;
        let nonce: Nonce<U12> = nonce_array.into();

        let plaintext = cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| "Decryption failed - wrong key or corrupted data")?;

        let value = String::from_utf8(plaintext)
            .map_err(|e| format!("Decrypted session is not valid UTF-8: {}", e))?;

        debug!("Session decrypted successfully");
        Ok(value)
    }
}

/// Generates a fresh random key, hex encoded.
pub fn generate_key_hex() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).map_err(|e| format!("Failed to generate random key: {}", e))?;
    Ok(hex::encode(key))
}
