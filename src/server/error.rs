use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::image_repo::RepoError;
use crate::server::registry::LoginError;

/// Server error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Logs 5xx errors with their full cause chain when converted to a response
/// - Allows attaching structured context (repo IDs, names, etc.)
/// - Returns a client-safe message, plus optional structured `details`
///
/// # Example
///
/// ```rust,ignore
/// use crate::server::error::ServerError;
///
/// let err = ServerError::bad_request("page starts at 1")
///     .with_context("operation", "search_repos");
/// ```
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Machine-readable payload returned next to the message
    pub details: Option<serde_json::Value>,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
}

impl ServerError {
    /// Create a new error with just status and message (no source error)
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            source: None,
            context: Vec::new(),
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            source: Some(source),
            context: Vec::new(),
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Create a 500 Internal Server Error from an anyhow::Error
    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            // Log with structured fields to prevent log injection
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "Server error"
                );
            } else {
                tracing::warn!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Server error"
                );
            }
        }

        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "Internal server error")
    }
}

impl From<RepoError> for ServerError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(_) => Self::not_found(err.to_string()),
            RepoError::Conflict(message) => Self::conflict(message),
            RepoError::DeleteBlocked(ref blocking) => {
                let details = json!({ "blocking": blocking });
                Self::conflict(err.to_string()).with_details(details)
            }
            RepoError::Validation(message) => Self::bad_request(message),
            RepoError::Login(login) => {
                let status = match login {
                    LoginError::Auth(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    LoginError::Network(_) => StatusCode::BAD_GATEWAY,
                    LoginError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                };
                let kind = login.kind();
                Self::new(status, login.to_string()).with_details(json!({ "kind": kind }))
            }
            RepoError::Internal(source) => Self::internal_anyhow(source, "Internal server error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::image_repo::models::{BlockReason, BlockingRepo};
    use std::time::Duration;

    #[test]
    fn test_repo_error_status_mapping() {
        let cases = [
            (RepoError::NotFound(3), StatusCode::NOT_FOUND),
            (RepoError::conflict("dup"), StatusCode::CONFLICT),
            (RepoError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                RepoError::Login(LoginError::Auth("401".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RepoError::Login(LoginError::Network("refused".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RepoError::Login(LoginError::Timeout(Duration::from_secs(10))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RepoError::Internal(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = ServerError::from(RepoError::Internal(anyhow::anyhow!("secret path /var/x")));
        assert_eq!(err.message, "Internal server error");
        assert!(err.source.is_some());
    }

    #[test]
    fn test_delete_blocked_carries_details() {
        let err = ServerError::from(RepoError::DeleteBlocked(vec![BlockingRepo {
            id: 2,
            name: "harbor".to_string(),
            reason: BlockReason::InUse,
            dependents: vec!["container web".to_string()],
        }]));
        assert_eq!(err.status, StatusCode::CONFLICT);
        let details = err.details.unwrap();
        assert_eq!(details["blocking"][0]["reason"], "in_use");
        assert_eq!(details["blocking"][0]["dependents"][0], "container web");
    }
}
