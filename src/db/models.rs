use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Image repository model - one configured container registry
///
/// `password_encrypted` holds the base64 AES-256-GCM blob produced by the
/// encryption provider. It must never be serialized into API responses, use
/// the redacted response types in `server::image_repo::models` instead.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRepo {
    pub id: i64,
    pub name: String,
    /// Registry host with optional port and path prefix, without scheme
    pub endpoint: String,
    pub protocol: RepoProtocol,
    pub skip_tls_verify: bool,
    /// Whether the registry requires a login at all
    pub auth: bool,
    pub username: Option<String>,
    pub password_encrypted: Option<String>,
    pub access: RepoAccess,
    /// Built-in default registry: never deletable, only updatable
    pub protected: bool,
    /// Optimistic concurrency counter, bumped on every update
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transport used to reach a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepoProtocol {
    Http,
    Https,
}

impl RepoProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            RepoProtocol::Http => "http",
            RepoProtocol::Https => "https",
        }
    }
}

impl std::fmt::Display for RepoProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// Whether images may only be pulled from a registry or also pushed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RepoAccess {
    Pull,
    PushPull,
}

impl std::fmt::Display for RepoAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoAccess::Pull => write!(f, "pull"),
            RepoAccess::PushPull => write!(f, "push_pull"),
        }
    }
}

/// Column values for inserting a new image repository
#[derive(Debug, Clone)]
pub struct NewImageRepo {
    pub name: String,
    pub endpoint: String,
    pub protocol: RepoProtocol,
    pub skip_tls_verify: bool,
    pub auth: bool,
    pub username: Option<String>,
    pub password_encrypted: Option<String>,
    pub access: RepoAccess,
    pub protected: bool,
}

/// Full set of mutable columns written by an update
#[derive(Debug, Clone)]
pub struct ImageRepoChanges {
    pub name: String,
    pub endpoint: String,
    pub protocol: RepoProtocol,
    pub skip_tls_verify: bool,
    pub auth: bool,
    pub username: Option<String>,
    pub password_encrypted: Option<String>,
    pub access: RepoAccess,
}

impl From<&ImageRepo> for ImageRepoChanges {
    fn from(repo: &ImageRepo) -> Self {
        Self {
            name: repo.name.clone(),
            endpoint: repo.endpoint.clone(),
            protocol: repo.protocol,
            skip_tls_verify: repo.skip_tls_verify,
            auth: repo.auth,
            username: repo.username.clone(),
            password_encrypted: repo.password_encrypted.clone(),
            access: repo.access,
        }
    }
}

/// A resource that currently selects an image repository as pull/push source
#[derive(Debug, Clone, FromRow)]
pub struct RepoUsage {
    pub repo_id: i64,
    pub dependent_kind: String,
    pub dependent_name: String,
    pub created_at: DateTime<Utc>,
}
