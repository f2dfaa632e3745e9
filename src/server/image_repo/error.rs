use thiserror::Error;

use super::models::{BlockReason, BlockingRepo};
use crate::server::registry::LoginError;

/// Errors returned by [`super::ImageRepoService`]
///
/// Messages never contain secret material; storage and encryption failures
/// keep their cause chain in `Internal` for server-side logging only.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Image repo {0} not found")]
    NotFound(i64),

    /// Duplicate name or a concurrent modification of the same entry
    #[error("{0}")]
    Conflict(String),

    /// Batch delete refused as a whole
    #[error("Cannot delete image repos: {}", describe_blocking(.0))]
    DeleteBlocked(Vec<BlockingRepo>),

    #[error("{0}")]
    Validation(String),

    /// Live login failed; passed through verbatim
    #[error(transparent)]
    Login(#[from] LoginError),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl RepoError {
    pub fn conflict(message: impl Into<String>) -> Self {
        RepoError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RepoError::Validation(message.into())
    }
}

fn describe_blocking(blocking: &[BlockingRepo]) -> String {
    blocking
        .iter()
        .map(|repo| match repo.reason {
            BlockReason::Protected => format!("'{}' is the built-in default registry", repo.name),
            BlockReason::InUse => format!(
                "'{}' is used by {}",
                repo.name,
                repo.dependents.join(", ")
            ),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_blocked_message_names_every_repo() {
        let err = RepoError::DeleteBlocked(vec![
            BlockingRepo {
                id: 1,
                name: "Docker Hub".to_string(),
                reason: BlockReason::Protected,
                dependents: vec![],
            },
            BlockingRepo {
                id: 4,
                name: "harbor".to_string(),
                reason: BlockReason::InUse,
                dependents: vec!["container web".to_string(), "compose shop".to_string()],
            },
        ]);

        assert_eq!(
            err.to_string(),
            "Cannot delete image repos: 'Docker Hub' is the built-in default registry; \
             'harbor' is used by container web, compose shop"
        );
    }
}
