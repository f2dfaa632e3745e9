use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{ImageRepo, ImageRepoChanges, NewImageRepo};

const COLUMNS: &str = "id, name, endpoint, protocol, skip_tls_verify, auth, username, \
     password_encrypted, access, protected, version, created_at, updated_at";

/// Escape LIKE wildcards so user input is matched literally
fn like_pattern(info: &str) -> String {
    let escaped = info
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// List all image repositories, oldest first
pub async fn list(pool: &SqlitePool) -> Result<Vec<ImageRepo>> {
    let repos = sqlx::query_as::<_, ImageRepo>(&format!(
        "SELECT {} FROM image_repos ORDER BY created_at, id",
        COLUMNS
    ))
    .fetch_all(pool)
    .await
    .context("Failed to list image repos")?;

    Ok(repos)
}

/// Count and fetch one page of image repositories whose name contains `info`
///
/// `page` is 1-based. An empty `info` matches every repository.
pub async fn page(
    pool: &SqlitePool,
    info: &str,
    page: u32,
    page_size: u32,
) -> Result<(i64, Vec<ImageRepo>)> {
    let pattern = like_pattern(info.trim());
    let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM image_repos WHERE name LIKE ? ESCAPE '\'"#,
    )
    .bind(&pattern)
    .fetch_one(pool)
    .await
    .context("Failed to count image repos")?;

    let repos = sqlx::query_as::<_, ImageRepo>(&format!(
        r#"SELECT {} FROM image_repos
        WHERE name LIKE ? ESCAPE '\'
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?"#,
        COLUMNS
    ))
    .bind(&pattern)
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to page image repos")?;

    Ok((total, repos))
}

/// Find image repository by ID
pub async fn find_by_id<'a, E>(executor: E, id: i64) -> Result<Option<ImageRepo>>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let repo = sqlx::query_as::<_, ImageRepo>(&format!(
        "SELECT {} FROM image_repos WHERE id = ?",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("Failed to find image repo by ID")?;

    Ok(repo)
}

/// Find image repository by name (case-insensitive due to column collation)
pub async fn find_by_name<'a, E>(executor: E, name: &str) -> Result<Option<ImageRepo>>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let repo = sqlx::query_as::<_, ImageRepo>(&format!(
        "SELECT {} FROM image_repos WHERE name = ?",
        COLUMNS
    ))
    .bind(name)
    .fetch_optional(executor)
    .await
    .context("Failed to find image repo by name")?;

    Ok(repo)
}

/// Find all image repositories with the given IDs; unknown IDs are skipped
pub async fn find_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<ImageRepo>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM image_repos WHERE id IN (", COLUMNS));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id");

    let repos = builder
        .build_query_as::<ImageRepo>()
        .fetch_all(pool)
        .await
        .context("Failed to find image repos by IDs")?;

    Ok(repos)
}

/// Find the built-in default repository, if one was seeded
pub async fn find_protected(pool: &SqlitePool) -> Result<Option<ImageRepo>> {
    let repo = sqlx::query_as::<_, ImageRepo>(&format!(
        "SELECT {} FROM image_repos WHERE protected = 1",
        COLUMNS
    ))
    .fetch_optional(pool)
    .await
    .context("Failed to find protected image repo")?;

    Ok(repo)
}

/// Insert a new image repository
///
/// Name collisions surface as a unique violation in the error chain, see
/// [`crate::db::is_unique_violation`].
pub async fn create<'a, E>(executor: E, repo: &NewImageRepo) -> Result<ImageRepo>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let now = Utc::now();

    let created = sqlx::query_as::<_, ImageRepo>(&format!(
        r#"INSERT INTO image_repos
            (name, endpoint, protocol, skip_tls_verify, auth, username,
             password_encrypted, access, protected, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        RETURNING {}"#,
        COLUMNS
    ))
    .bind(&repo.name)
    .bind(&repo.endpoint)
    .bind(repo.protocol)
    .bind(repo.skip_tls_verify)
    .bind(repo.auth)
    .bind(&repo.username)
    .bind(&repo.password_encrypted)
    .bind(repo.access)
    .bind(repo.protected)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .context("Failed to create image repo")?;

    Ok(created)
}

/// Overwrite the mutable columns of a repository if it is still at `expected_version`
///
/// Returns the updated row, or `None` when the row is gone or was modified
/// concurrently.
pub async fn update<'a, E>(
    executor: E,
    id: i64,
    expected_version: i64,
    changes: &ImageRepoChanges,
) -> Result<Option<ImageRepo>>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let updated = sqlx::query_as::<_, ImageRepo>(&format!(
        r#"UPDATE image_repos
        SET name = ?, endpoint = ?, protocol = ?, skip_tls_verify = ?, auth = ?,
            username = ?, password_encrypted = ?, access = ?,
            version = version + 1, updated_at = ?
        WHERE id = ? AND version = ?
        RETURNING {}"#,
        COLUMNS
    ))
    .bind(&changes.name)
    .bind(&changes.endpoint)
    .bind(changes.protocol)
    .bind(changes.skip_tls_verify)
    .bind(changes.auth)
    .bind(&changes.username)
    .bind(&changes.password_encrypted)
    .bind(changes.access)
    .bind(Utc::now())
    .bind(id)
    .bind(expected_version)
    .fetch_optional(executor)
    .await
    .context("Failed to update image repo")?;

    Ok(updated)
}

/// Delete the given repositories in one transaction
///
/// Protected rows are never deleted. If fewer rows than `ids` were removed
/// (unknown, protected or concurrently deleted) the transaction is rolled back
/// and `false` is returned.
pub async fn delete_many(pool: &SqlitePool, ids: &[i64]) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let mut deleted = 0u64;
    for id in ids {
        let result = sqlx::query("DELETE FROM image_repos WHERE id = ? AND protected = 0")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete image repo")?;
        deleted += result.rows_affected();
    }

    if deleted != ids.len() as u64 {
        tx.rollback()
            .await
            .context("Failed to roll back image repo deletion")?;
        return Ok(false);
    }

    tx.commit()
        .await
        .context("Failed to commit image repo deletion")?;

    Ok(true)
}
