use std::time::Duration;

use thiserror::Error;

/// Why a registry login did not succeed
///
/// The three kinds are kept apart so callers can tell "bad password" from
/// "registry unreachable". None of them is retried automatically.
#[derive(Debug, Error)]
pub enum LoginError {
    /// The registry answered and rejected the credentials
    #[error("Registry rejected the credentials: {0}")]
    Auth(String),

    /// Connection refused, DNS or TLS failure, or a response no compliant
    /// registry would send
    #[error("Registry unreachable: {0}")]
    Network(String),

    /// No complete answer before the deadline
    #[error("Registry did not answer within {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl LoginError {
    /// Short machine-readable kind for logs and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            LoginError::Auth(_) => "auth",
            LoginError::Network(_) => "network",
            LoginError::Timeout(_) => "timeout",
        }
    }
}
