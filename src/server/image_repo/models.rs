use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{ImageRepo, RepoAccess, RepoProtocol};

const MASKED_SECRET: &str = "••••••••";

/// Secret received from a client; never printed by `Debug`
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

/// Paged search request; `info` filters by name substring
#[derive(Debug, Clone, Deserialize)]
pub struct SearchWithPage {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// API representation of an image repository with the secret masked
#[derive(Debug, Serialize)]
pub struct ImageRepoResponse {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub protocol: RepoProtocol,
    pub skip_tls_verify: bool,
    pub auth: bool,
    pub username: Option<String>,
    /// Masked indicator, empty when no secret is stored
    pub password: String,
    pub has_password: bool,
    pub access: RepoAccess,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ImageRepo> for ImageRepoResponse {
    fn from(repo: ImageRepo) -> Self {
        let has_password = repo.password_encrypted.is_some();
        Self {
            id: repo.id,
            name: repo.name,
            endpoint: repo.endpoint,
            protocol: repo.protocol,
            skip_tls_verify: repo.skip_tls_verify,
            auth: repo.auth,
            username: repo.username,
            password: if has_password {
                MASKED_SECRET.to_string()
            } else {
                String::new()
            },
            has_password,
            access: repo.access,
            protected: repo.protected,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
        }
    }
}

/// Entry for registry selection dropdowns
#[derive(Debug, Serialize)]
pub struct ImageRepoOption {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
}

impl From<ImageRepo> for ImageRepoOption {
    fn from(repo: ImageRepo) -> Self {
        Self {
            id: repo.id,
            name: repo.name,
            endpoint: repo.endpoint,
        }
    }
}

fn default_protocol() -> RepoProtocol {
    RepoProtocol::Https
}

fn default_access() -> RepoAccess {
    RepoAccess::PushPull
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateImageRepoRequest {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_protocol")]
    pub protocol: RepoProtocol,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub auth: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_access")]
    pub access: RepoAccess,
}

/// Partial update; omitted fields keep their stored value
///
/// An omitted or blank `password` keeps the stored secret.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateImageRepoRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub protocol: Option<RepoProtocol>,
    #[serde(default)]
    pub skip_tls_verify: Option<bool>,
    #[serde(default)]
    pub auth: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub access: Option<RepoAccess>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteImageReposRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperateById {
    pub id: i64,
}

/// Names needed by the caller to describe an update in its audit log
///
/// `previous_name` differs from `name` only when the update renamed the entry.
#[derive(Debug, Serialize)]
pub struct UpdateResult {
    pub id: i64,
    pub name: String,
    pub previous_name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub deleted_names: Vec<String>,
}

/// Why a repository blocked a batch delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Protected,
    InUse,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockingRepo {
    pub id: i64,
    pub name: String,
    pub reason: BlockReason,
    /// Resources referencing the repository (informational, may be stale)
    pub dependents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let req: CreateImageRepoRequest = serde_json::from_value(serde_json::json!({
            "name": "harbor",
            "endpoint": "harbor.local",
            "auth": true,
            "username": "admin",
            "password": "hunter2"
        }))
        .unwrap();

        assert_eq!(req.protocol, RepoProtocol::Https);
        assert_eq!(req.access, RepoAccess::PushPull);
        assert_eq!(req.password.as_ref().map(|p| p.expose()), Some("hunter2"));
        assert!(!format!("{:?}", req).contains("hunter2"));
    }

    #[test]
    fn test_search_defaults() {
        let req: SearchWithPage = serde_json::from_str(r#"{"info":"hub"}"#).unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 10);
    }
}
