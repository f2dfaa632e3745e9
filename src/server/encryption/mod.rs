pub mod providers;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::server::settings::EncryptionSettings;

/// Encrypts registry secrets before they are written to the database
///
/// Implementations hold the process-wide key and are read-only after
/// construction, so a single instance is shared behind an `Arc`.
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt plaintext and return base64-encoded ciphertext
    async fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt base64-encoded ciphertext and return plaintext
    async fn decrypt(&self, ciphertext: &str) -> Result<String>;

    /// Get provider name for logging
    fn provider_name(&self) -> &str;
}

/// Build the configured provider and prove it can round-trip a value
pub async fn init_provider(settings: &EncryptionSettings) -> Result<Arc<dyn EncryptionProvider>> {
    let provider: Arc<dyn EncryptionProvider> = match settings {
        EncryptionSettings::Local { key } => Arc::new(
            providers::local::LocalEncryptionProvider::new(key)
                .context("Failed to initialize local encryption provider")?,
        ),
    };

    self_test(provider.as_ref()).await.with_context(|| {
        format!(
            "Encryption provider '{}' failed its startup self-test",
            provider.provider_name()
        )
    })?;
    tracing::info!(
        provider = provider.provider_name(),
        "Credential encryption provider initialized"
    );

    Ok(provider)
}

async fn self_test(provider: &dyn EncryptionProvider) -> Result<()> {
    const PROBE: &str = "repo-vault-encryption-probe";

    let ciphertext = provider.encrypt(PROBE).await.context("Encryption failed")?;
    let decrypted = provider
        .decrypt(&ciphertext)
        .await
        .context("Decryption failed")?;

    if decrypted != PROBE {
        anyhow::bail!("Decrypted probe does not match the original value");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_provider_runs_self_test() {
        let settings = EncryptionSettings::Local {
            key: providers::local::generate_key(),
        };
        let provider = init_provider(&settings).await.unwrap();
        assert_eq!(provider.provider_name(), "local-aes-256-gcm");
    }

    #[tokio::test]
    async fn test_init_provider_rejects_bad_key() {
        let settings = EncryptionSettings::Local {
            key: "not base64!".to_string(),
        };
        assert!(init_provider(&settings).await.is_err());
    }
}
