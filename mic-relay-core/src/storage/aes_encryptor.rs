use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

use crate::traits::encryptor::FrameEncryptor;

/// AES-256-GCM chunk encryptor with a caller-supplied key.
///
/// Each call draws a fresh 96-bit nonce from the OS and returns
/// `nonce (12B) || ciphertext || tag (16B)`.
pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
    key_id: String,
}

impl AesGcmEncryptor {
    pub fn new(key: [u8; 32], key_id: impl Into<String>) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Open a chunk produced by [`FrameEncryptor::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, String> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(format!("sealed chunk too short: {} bytes", sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| format!("AES-GCM decryption failed: {}", e))
    }
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

impl FrameEncryptor for AesGcmEncryptor {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data)
            .map_err(|e| format!("AES-GCM encryption failed: {}", e))?;

        // aes-gcm appends the tag; prepend the nonce.
        let mut combined = Vec::with_capacity(nonce.len() + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn key_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("keyId".to_string(), self.key_id.clone()),
            ("algorithm".to_string(), self.algorithm().to_string()),
        ])
    }

    fn algorithm(&self) -> &str {
        "AES-256-GCM"
    }
}
