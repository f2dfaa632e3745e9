use crate::db;
use crate::server::encryption::{self, EncryptionProvider};
use crate::server::image_repo::ImageRepoService;
use crate::server::registry::{HttpRegistryClient, RegistryClient};
use crate::server::settings::{RegistryClientSettings, Settings};
use crate::server::usage::DbUsageGuard;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Full state for HTTP server
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub repo_service: Arc<ImageRepoService>,
}

impl AppState {
    /// Connect the database, build the providers and seed the default registry
    pub async fn new(settings: &Settings) -> Result<Self> {
        tracing::info!("Connecting to database...");
        let db_pool = db::connect(&settings.database.url, settings.database.max_connections)
            .await
            .context("Failed to open image repo database")?;

        let encryption = encryption::init_provider(&settings.encryption).await?;
        let registry_client = build_registry_client(&settings.registry_client);

        let state = Self::from_parts(db_pool, encryption, registry_client);
        state
            .repo_service
            .ensure_default_repo(&settings.default_repo)
            .await
            .context("Failed to seed default image repo")?;

        Ok(state)
    }

    /// Assemble state around an existing pool
    pub fn from_parts(
        db_pool: SqlitePool,
        encryption: Arc<dyn EncryptionProvider>,
        registry_client: Arc<dyn RegistryClient>,
    ) -> Self {
        let usage_guard = Arc::new(DbUsageGuard::new(db_pool.clone()));
        let repo_service = Arc::new(ImageRepoService::new(
            db_pool.clone(),
            encryption,
            registry_client,
            usage_guard,
        ));

        Self {
            db_pool,
            repo_service,
        }
    }
}

fn build_registry_client(settings: &RegistryClientSettings) -> Arc<dyn RegistryClient> {
    let client = HttpRegistryClient::new(settings.timeout(), settings.connect_timeout());
    tracing::info!(
        timeout_secs = settings.timeout_secs,
        connect_timeout_secs = settings.connect_timeout_secs,
        use_system_proxy = settings.use_system_proxy,
        "Registry client configured"
    );

    if settings.use_system_proxy {
        Arc::new(client)
    } else {
        Arc::new(client.without_proxy())
    }
}
