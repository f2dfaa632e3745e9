use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::repo_usages;

/// Tells whether other resources still reference an image repository
///
/// The answer is advisory: a registry reported free may be selected by a
/// container a moment later. Dependents re-resolve their registry by ID when
/// they actually pull or push, so a deleted registry surfaces there.
#[async_trait]
pub trait UsageGuard: Send + Sync {
    /// Human-readable names of the resources using `repo_id`
    async fn dependents(&self, repo_id: i64) -> Result<Vec<String>>;

    async fn in_use(&self, repo_id: i64) -> Result<bool> {
        Ok(!self.dependents(repo_id).await?.is_empty())
    }
}

/// Usage guard backed by the `image_repo_usages` table
///
/// The container and build subsystem owns the rows; this guard only reads.
pub struct DbUsageGuard {
    pool: SqlitePool,
}

impl DbUsageGuard {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageGuard for DbUsageGuard {
    async fn dependents(&self, repo_id: i64) -> Result<Vec<String>> {
        let usages = repo_usages::list_for_repo(&self.pool, repo_id).await?;
        Ok(usages
            .into_iter()
            .map(|u| format!("{} {}", u.dependent_kind, u.dependent_name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_db_guard_reports_dependents() -> Result<()> {
        let pool = test_pool().await;
        let guard = DbUsageGuard::new(pool.clone());
        assert!(!guard.in_use(7).await?);

        repo_usages::fixtures::record(&pool, 7, "container", "nginx").await?;
        assert!(guard.in_use(7).await?);
        assert_eq!(guard.dependents(7).await?, vec!["container nginx".to_string()]);
        assert!(!guard.in_use(8).await?);
        Ok(())
    }
}
