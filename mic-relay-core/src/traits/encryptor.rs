use std::collections::HashMap;

/// Chunk encryption used by [`WavFileSink`](crate::storage::wav_sink::WavFileSink).
///
/// Encrypted chunk format:
/// ```text
/// [12-byte nonce] [ciphertext] [16-byte GCM authentication tag]
/// ```
pub trait FrameEncryptor: Send + Sync {
    /// Returns: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, String>;

    /// Metadata about the key (e.g. `keyId`).
    fn key_metadata(&self) -> HashMap<String, String>;

    /// Algorithm identifier (e.g. "AES-256-GCM").
    fn algorithm(&self) -> &str;
}
