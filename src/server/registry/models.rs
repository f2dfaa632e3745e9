use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::RepoProtocol;

/// Registry hosts that serve the Docker Hub API under a different name
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry.hub.docker.com"];
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Username and decrypted secret, held in memory only for one login
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the client needs to attempt one login
#[derive(Debug, Clone)]
pub struct LoginTarget {
    /// `host[:port]` optionally followed by a path prefix
    pub endpoint: String,
    pub protocol: RepoProtocol,
    pub skip_tls_verify: bool,
    /// `None` for registries configured without authentication
    pub credentials: Option<Credentials>,
}

impl LoginTarget {
    /// Host (and port) serving the distribution API
    pub fn api_host(&self) -> &str {
        let host = self.endpoint.split('/').next().unwrap_or(&self.endpoint);
        if DOCKER_HUB_ALIASES
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(host))
        {
            DOCKER_HUB_API_HOST
        } else {
            host
        }
    }

    /// URL of the API version check endpoint, the standard login probe
    pub fn version_check_url(&self) -> String {
        format!("{}://{}/v2/", self.protocol.scheme(), self.api_host())
    }
}

/// Which handshake the registry ended up using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFlow {
    /// No credentials involved: `/v2/` was open or handed out an anonymous token
    Anonymous,
    Basic,
    /// Credentials were exchanged for a token at the challenge realm
    Bearer,
}

/// Outcome of a successful login, produced per request and never stored
#[derive(Debug, Clone, Serialize)]
pub struct LoginAttempt {
    pub success: bool,
    pub flow: AuthFlow,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}
