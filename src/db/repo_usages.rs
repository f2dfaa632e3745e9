use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::db::models::RepoUsage;

/// List resources that reference an image repository
pub async fn list_for_repo(pool: &SqlitePool, repo_id: i64) -> Result<Vec<RepoUsage>> {
    let usages = sqlx::query_as::<_, RepoUsage>(
        r#"
        SELECT repo_id, dependent_kind, dependent_name, created_at
        FROM image_repo_usages
        WHERE repo_id = ?
        ORDER BY dependent_kind, dependent_name
        "#,
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await
    .context("Failed to list image repo usages")?;

    Ok(usages)
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_record_is_idempotent() -> Result<()> {
        let pool = test_pool().await;
        record(&pool, 1, "container", "web").await?;
        record(&pool, 1, "container", "web").await?;
        record(&pool, 1, "compose", "stack").await?;
        record(&pool, 2, "container", "db").await?;

        let usages = list_for_repo(&pool, 1).await?;
        let names: Vec<_> = usages.iter().map(|u| u.dependent_name.as_str()).collect();
        assert_eq!(names, vec!["stack", "web"]);
        Ok(())
    }
}
