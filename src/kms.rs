//! KMS envelope encryption for `cipher-` prefixed keys.
//!
//! Same trait-plus-mock shape as the HTTP transport seam: a small
//! `async_trait` seam with one production implementation and one in-memory
//! test double, so the config read/write path can be exercised without a
//! real KMS endpoint.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

use crate::error::{ClientError, Result};

/// `dataId` values starting with this prefix are transparently encrypted on
/// publish and decrypted on read.
pub const CIPHER_PREFIX: &str = "cipher-";

/// Envelope encryption for ciphered config content.
///
/// Implementations receive plaintext/ciphertext as `String`s — the wire
/// format this crate stores is base64 text, matching how the control plane
/// round-trips ciphered content through its own string-typed content field.
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// A `KmsClient` that performs no encryption — content passes through
/// unchanged. Used when `kms_enabled` is false; callers must not publish to
/// `cipher-` prefixed keys with this implementation, since reads from other
/// clients would still expect real ciphertext.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKms;

#[async_trait]
impl KmsClient for NoopKms {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

/// A symmetric, base64-wrapping stand-in for a real KMS, used in tests.
///
/// Not a security primitive: it XORs plaintext bytes against a repeating
/// key derived from the configured key id, then base64-encodes the result,
/// so encrypt/decrypt round-trip deterministically without a network call.
#[derive(Debug, Clone)]
pub struct MockKms {
    key: Vec<u8>,
}

impl MockKms {
    pub fn new(key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        Self {
            key: if key_id.is_empty() {
                vec![0xA5]
            } else {
                key_id.into_bytes()
            },
        }
    }

    fn xor(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ self.key[i % self.key.len()])
            .collect()
    }
}

#[async_trait]
impl KmsClient for MockKms {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(BASE64_STANDARD.encode(self.xor(plaintext.as_bytes())))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = BASE64_STANDARD
            .decode(ciphertext)
            .map_err(|e| ClientError::DecryptionError(e.to_string()))?;
        String::from_utf8(self.xor(&raw)).map_err(|e| ClientError::DecryptionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_kms_passes_content_through() {
        let kms = NoopKms;
        let ct = kms.encrypt("hello").await.unwrap();
        assert_eq!(ct, "hello");
        let pt = kms.decrypt(&ct).await.unwrap();
        assert_eq!(pt, "hello");
    }

    #[tokio::test]
    async fn mock_kms_round_trips() {
        let kms = MockKms::new("test-key-id");
        let ct = kms.encrypt("super secret value").await.unwrap();
        assert_ne!(ct, "super secret value");
        let pt = kms.decrypt(&ct).await.unwrap();
        assert_eq!(pt, "super secret value");
    }

    #[tokio::test]
    async fn mock_kms_rejects_invalid_base64() {
        let kms = MockKms::new("k");
        assert!(kms.decrypt("not base64!!").await.is_err());
    }

    #[test]
    fn cipher_prefix_matches_key_detection() {
        let key = crate::types::Key::simple("cipher-secret", "G");
        assert!(key.is_ciphered());
        let key = crate::types::Key::simple("plain", "G");
        assert!(!key.is_ciphered());
    }
}
