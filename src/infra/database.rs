// Shared SQLite connection pool. Every store borrows a clone of it.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Open (and create if needed) the database behind `database_url`.
///
/// Accepts `sqlite://path/to/file.db`, a bare file path, or `sqlite::memory:`.
pub async fn connect(database_url: &str) -> Result<Pool<Sqlite>> {
    let in_memory = database_url.contains(":memory:");

    let conn_str = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite://{}", database_url)
    };

    if !in_memory {
        let path_str = conn_str
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        if let Some(parent) = Path::new(path_str).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&conn_str)
        .with_context(|| format!("Invalid DATABASE_URL {database_url}"))?
        .create_if_missing(true);

    // Each connection to :memory: is its own database, so keep exactly one
    // and never let the pool recycle it.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {database_url}"))?;

    Ok(pool)
}

/// Fresh in-memory database for store tests.
#[cfg(test)]
pub async fn memory_pool() -> Pool<Sqlite> {
    connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should always open")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect(&url).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn memory_pool_is_usable() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
