use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;

use super::error::RepoError;
use super::models::{
    BlockReason, BlockingRepo, CreateImageRepoRequest, DeleteResult, ImageRepoOption,
    ImageRepoResponse, PageResult, SearchWithPage, SecretString, UpdateImageRepoRequest,
    UpdateResult,
};
use crate::db::models::{ImageRepo, ImageRepoChanges, NewImageRepo, RepoAccess, RepoProtocol};
use crate::db::{image_repos, is_unique_violation};
use crate::server::encryption::EncryptionProvider;
use crate::server::registry::{Credentials, LoginAttempt, LoginTarget, RegistryClient};
use crate::server::settings::DefaultRepoSettings;
use crate::server::usage::UsageGuard;

const MAX_NAME_LEN: usize = 64;
const MAX_PAGE_SIZE: u32 = 100;

/// Orchestrates the credential store, registry client and usage guard
pub struct ImageRepoService {
    pool: SqlitePool,
    encryption: Arc<dyn EncryptionProvider>,
    registry_client: Arc<dyn RegistryClient>,
    usage_guard: Arc<dyn UsageGuard>,
}

impl ImageRepoService {
    pub fn new(
        pool: SqlitePool,
        encryption: Arc<dyn EncryptionProvider>,
        registry_client: Arc<dyn RegistryClient>,
        usage_guard: Arc<dyn UsageGuard>,
    ) -> Self {
        Self {
            pool,
            encryption,
            registry_client,
            usage_guard,
        }
    }

    pub async fn page(
        &self,
        req: &SearchWithPage,
    ) -> Result<PageResult<ImageRepoResponse>, RepoError> {
        if req.page == 0 {
            return Err(RepoError::validation("page starts at 1"));
        }
        if req.page_size == 0 || req.page_size > MAX_PAGE_SIZE {
            return Err(RepoError::validation(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let (total, repos) =
            image_repos::page(&self.pool, &req.info, req.page, req.page_size).await?;

        Ok(PageResult {
            items: repos.into_iter().map(ImageRepoResponse::from).collect(),
            total,
        })
    }

    pub async fn list(&self) -> Result<Vec<ImageRepoOption>, RepoError> {
        let repos = image_repos::list(&self.pool).await?;
        Ok(repos.into_iter().map(ImageRepoOption::from).collect())
    }

    pub async fn get(&self, id: i64) -> Result<ImageRepoResponse, RepoError> {
        Ok(self.load(id).await?.into())
    }

    /// Log in to the registry with its stored credentials
    ///
    /// The entry is read and decrypted first; no database connection is held
    /// while the handshake runs. The outcome is returned, never stored.
    pub async fn login(&self, id: i64) -> Result<LoginAttempt, RepoError> {
        let repo = self.load(id).await?;
        let target = self.login_target(&repo).await?;

        tracing::debug!(repo_id = id, name = %repo.name, "Checking image repo status");
        let attempt = self.registry_client.verify_login(&target).await?;
        Ok(attempt)
    }

    pub async fn create(
        &self,
        req: CreateImageRepoRequest,
    ) -> Result<ImageRepoResponse, RepoError> {
        let name = validate_name(&req.name)?;
        let endpoint = normalize_endpoint(&req.endpoint)?;
        let (username, password) = if req.auth {
            let username = require_username(req.username.as_deref())?;
            let password = req
                .password
                .as_ref()
                .filter(|p| !p.is_blank())
                .ok_or_else(|| RepoError::validation("password is required when auth is enabled"))?;
            (Some(username), Some(password))
        } else {
            (None, None)
        };

        if image_repos::find_by_name(&self.pool, &name).await?.is_some() {
            return Err(duplicate_name(&name));
        }

        let password_encrypted = match password {
            Some(password) => Some(self.encrypt(password).await?),
            None => None,
        };

        let new_repo = NewImageRepo {
            name: name.clone(),
            endpoint,
            protocol: req.protocol,
            skip_tls_verify: req.skip_tls_verify,
            auth: req.auth,
            username,
            password_encrypted,
            access: req.access,
            protected: false,
        };

        let created = image_repos::create(&self.pool, &new_repo)
            .await
            .map_err(|e| map_write_error(e, &name))?;

        tracing::info!(repo_id = created.id, name = %created.name, "Created image repo");
        Ok(created.into())
    }

    pub async fn update(&self, req: UpdateImageRepoRequest) -> Result<UpdateResult, RepoError> {
        let existing = self.load(req.id).await?;
        let mut changes = ImageRepoChanges::from(&existing);

        if let Some(name) = req.name.as_deref() {
            changes.name = validate_name(name)?;
            if let Some(other) = image_repos::find_by_name(&self.pool, &changes.name).await? {
                if other.id != existing.id {
                    return Err(duplicate_name(&changes.name));
                }
            }
        }
        if let Some(endpoint) = req.endpoint.as_deref() {
            changes.endpoint = normalize_endpoint(endpoint)?;
        }
        if let Some(protocol) = req.protocol {
            changes.protocol = protocol;
        }
        if let Some(skip_tls_verify) = req.skip_tls_verify {
            changes.skip_tls_verify = skip_tls_verify;
        }
        if let Some(access) = req.access {
            changes.access = access;
        }

        changes.auth = req.auth.unwrap_or(existing.auth);
        if changes.auth {
            let username = req.username.as_deref().or(existing.username.as_deref());
            changes.username = Some(require_username(username)?);

            match req.password.as_ref().filter(|p| !p.is_blank()) {
                Some(password) => changes.password_encrypted = Some(self.encrypt(password).await?),
                None if existing.password_encrypted.is_some() => {}
                None => {
                    return Err(RepoError::validation(
                        "password is required when auth is enabled",
                    ))
                }
            }
        } else {
            changes.username = None;
            changes.password_encrypted = None;
        }

        let updated = image_repos::update(&self.pool, existing.id, existing.version, &changes)
            .await
            .map_err(|e| map_write_error(e, &changes.name))?;

        let Some(updated) = updated else {
            // Lost the version race: deleted or changed underneath us
            return match image_repos::find_by_id(&self.pool, existing.id).await? {
                None => Err(RepoError::NotFound(existing.id)),
                Some(_) => Err(RepoError::conflict(format!(
                    "Image repo '{}' was modified concurrently, reload and retry",
                    existing.name
                ))),
            };
        };

        if credentials_changed(&existing, &updated) {
            tracing::info!(
                repo_id = updated.id,
                name = %updated.name,
                "Image repo connection settings changed, status must be re-checked"
            );
        }
        tracing::info!(repo_id = updated.id, name = %updated.name, "Updated image repo");

        Ok(UpdateResult {
            id: updated.id,
            name: updated.name,
            previous_name: existing.name,
        })
    }

    /// Delete all `ids` or none of them
    ///
    /// Fails with [`RepoError::DeleteBlocked`] listing every protected or
    /// in-use repository.
    pub async fn batch_delete(&self, ids: &[i64]) -> Result<DeleteResult, RepoError> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(RepoError::validation("no image repos selected"));
        }

        let repos = image_repos::find_by_ids(&self.pool, &ids).await?;
        if let Some(missing) = ids.iter().find(|id| !repos.iter().any(|r| r.id == **id)) {
            return Err(RepoError::NotFound(*missing));
        }

        let mut blocking = Vec::new();
        for repo in &repos {
            if repo.protected {
                blocking.push(BlockingRepo {
                    id: repo.id,
                    name: repo.name.clone(),
                    reason: BlockReason::Protected,
                    dependents: Vec::new(),
                });
                continue;
            }

            let dependents = self
                .usage_guard
                .dependents(repo.id)
                .await
                .with_context(|| format!("Failed to check usage of image repo {}", repo.id))?;
            if !dependents.is_empty() {
                blocking.push(BlockingRepo {
                    id: repo.id,
                    name: repo.name.clone(),
                    reason: BlockReason::InUse,
                    dependents,
                });
            }
        }

        if !blocking.is_empty() {
            tracing::info!(
                blocking = ?blocking.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
                "Refused to delete image repos"
            );
            return Err(RepoError::DeleteBlocked(blocking));
        }

        if !image_repos::delete_many(&self.pool, &ids).await? {
            // Rows vanished or changed between the checks and the delete
            return Err(RepoError::conflict(
                "Image repos changed while deleting, nothing was deleted",
            ));
        }

        let deleted_names: Vec<String> = repos.into_iter().map(|r| r.name).collect();
        tracing::info!(names = ?deleted_names, "Deleted image repos");
        Ok(DeleteResult { deleted_names })
    }

    /// Seed the protected built-in registry if it does not exist yet
    pub async fn ensure_default_repo(&self, settings: &DefaultRepoSettings) -> anyhow::Result<()> {
        if !settings.enabled {
            return Ok(());
        }

        if let Some(existing) = image_repos::find_protected(&self.pool).await? {
            tracing::debug!(name = %existing.name, "Default image repo present");
            return Ok(());
        }

        if image_repos::find_by_name(&self.pool, &settings.name)
            .await?
            .is_some()
        {
            tracing::warn!(
                name = %settings.name,
                "Not seeding default image repo: name already taken by a regular entry"
            );
            return Ok(());
        }

        let endpoint = normalize_endpoint(&settings.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid default_repo endpoint: {}", e))?;
        let default_repo = NewImageRepo {
            name: settings.name.trim().to_string(),
            endpoint,
            protocol: RepoProtocol::Https,
            skip_tls_verify: false,
            auth: false,
            username: None,
            password_encrypted: None,
            access: RepoAccess::Pull,
            protected: true,
        };

        match image_repos::create(&self.pool, &default_repo).await {
            Ok(created) => {
                tracing::info!(repo_id = created.id, name = %created.name, "Seeded default image repo");
                Ok(())
            }
            // Another instance seeded it first
            Err(e) if is_unique_violation(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn load(&self, id: i64) -> Result<ImageRepo, RepoError> {
        image_repos::find_by_id(&self.pool, id)
            .await?
            .ok_or(RepoError::NotFound(id))
    }

    async fn encrypt(&self, secret: &SecretString) -> Result<String, RepoError> {
        let ciphertext = self
            .encryption
            .encrypt(secret.expose())
            .await
            .context("Failed to encrypt registry password")?;
        Ok(ciphertext)
    }

    async fn login_target(&self, repo: &ImageRepo) -> Result<LoginTarget, RepoError> {
        let credentials = match (repo.auth, &repo.password_encrypted) {
            (true, Some(ciphertext)) => {
                let password = self
                    .encryption
                    .decrypt(ciphertext)
                    .await
                    .with_context(|| format!("Failed to decrypt password of image repo {}", repo.id))?;
                Some(Credentials {
                    username: repo.username.clone().unwrap_or_default(),
                    password,
                })
            }
            _ => None,
        };

        Ok(LoginTarget {
            endpoint: repo.endpoint.clone(),
            protocol: repo.protocol,
            skip_tls_verify: repo.skip_tls_verify,
            credentials,
        })
    }
}

fn duplicate_name(name: &str) -> RepoError {
    RepoError::conflict(format!("An image repo named '{}' already exists", name))
}

/// Turn a unique violation that slipped past the pre-check into a conflict
fn map_write_error(err: anyhow::Error, name: &str) -> RepoError {
    if is_unique_violation(&err) {
        duplicate_name(name)
    } else {
        RepoError::Internal(err)
    }
}

fn validate_name(name: &str) -> Result<String, RepoError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RepoError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RepoError::validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn require_username(username: Option<&str>) -> Result<String, RepoError> {
    username
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RepoError::validation("username is required when auth is enabled"))
}

/// Strip any scheme and trailing slashes; reject blanks and whitespace
fn normalize_endpoint(endpoint: &str) -> Result<String, RepoError> {
    let mut endpoint = endpoint.trim();
    for scheme in ["https://", "http://"] {
        let matches = endpoint
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme));
        if matches {
            endpoint = &endpoint[scheme.len()..];
            break;
        }
    }
    let endpoint = endpoint.trim_end_matches('/');

    if endpoint.is_empty() || endpoint.starts_with('/') {
        return Err(RepoError::validation("endpoint must name a registry host"));
    }
    if endpoint.chars().any(char::is_whitespace) {
        return Err(RepoError::validation("endpoint must not contain whitespace"));
    }
    Ok(endpoint.to_string())
}

fn credentials_changed(before: &ImageRepo, after: &ImageRepo) -> bool {
    before.endpoint != after.endpoint
        || before.protocol != after.protocol
        || before.skip_tls_verify != after.skip_tls_verify
        || before.auth != after.auth
        || before.username != after.username
        || before.password_encrypted != after.password_encrypted
}
