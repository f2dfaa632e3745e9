use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::server::encryption::EncryptionProvider;

const NONCE_LEN: usize = 12;

/// AES-256-GCM provider keyed from configuration
///
/// Stored blobs are `base64(nonce || ciphertext || tag)` with a fresh random
/// nonce per value.
pub struct LocalEncryptionProvider {
    cipher: Aes256Gcm,
}

impl LocalEncryptionProvider {
    /// Create a provider from a base64-encoded 32-byte key
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Encryption key is not valid base64")?;

        if key_bytes.len() != 32 {
            bail!(
                "Encryption key must be 32 bytes (256 bits) for AES-256-GCM, got {} bytes",
                key_bytes.len()
            );
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).context("Failed to create AES-256-GCM cipher")?;

        Ok(Self { cipher })
    }
}

/// Generate a random base64-encoded key suitable for [`LocalEncryptionProvider::new`]
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

#[async_trait]
impl EncryptionProvider for LocalEncryptionProvider {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // The aead error carries no detail; never include the plaintext here
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("AES-256-GCM encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&blob))
    }

    async fn decrypt(&self, ciphertext_base64: &str) -> Result<String> {
        let blob = BASE64
            .decode(ciphertext_base64)
            .context("Stored secret is not valid base64")?;

        if blob.len() <= NONCE_LEN {
            bail!("Stored secret is too short to contain a nonce and tag");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("AES-256-GCM decryption failed (wrong key or tampered data)"))?;

        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    fn provider_name(&self) -> &str {
        "local-aes-256-gcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let provider = LocalEncryptionProvider::new(&generate_key()).unwrap();

        let ciphertext = provider.encrypt("hunter2").await.unwrap();
        assert!(!ciphertext.contains("hunter2"));
        assert_eq!(provider.decrypt(&ciphertext).await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_different_nonces() {
        let provider = LocalEncryptionProvider::new(&generate_key()).unwrap();

        let first = provider.encrypt("same message").await.unwrap();
        let second = provider.encrypt("same message").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_without_leaking() {
        let writer = LocalEncryptionProvider::new(&generate_key()).unwrap();
        let reader = LocalEncryptionProvider::new(&generate_key()).unwrap();

        let ciphertext = writer.encrypt("s3cret-token").await.unwrap();
        let err = reader.decrypt(&ciphertext).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("s3cret-token"));
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = BASE64.encode(b"tooshort");
        assert!(LocalEncryptionProvider::new(&short_key).is_err());
    }

    #[tokio::test]
    async fn test_truncated_ciphertext() {
        let provider = LocalEncryptionProvider::new(&generate_key()).unwrap();
        assert!(provider.decrypt(&BASE64.encode([0u8; 8])).await.is_err());
    }
}
