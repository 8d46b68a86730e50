use std::{fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

/// SQLite-backed event-correlation store. Safe concurrent writes from
/// multiple in-flight delivery attempts are serialized by the pool and the
/// upsert, not by callers.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Records one correlation. Re-inserting the same local event replaces
    /// the remote identifier (a delivery attempt is settled exactly once, but
    /// replays from the framework must not fail).
    pub async fn insert_event_correlation(
        &self,
        puppet_id: i64,
        room_id: &str,
        local_event_id: &str,
        remote_event_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_correlations (puppet_id, room_id, local_event_id, remote_event_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(puppet_id, room_id, local_event_id)
             DO UPDATE SET remote_event_id = excluded.remote_event_id",
        )
        .bind(puppet_id)
        .bind(room_id)
        .bind(local_event_id)
        .bind(remote_event_id)
        .execute(&self.pool)
        .await
        .context("failed to insert event correlation")?;
        Ok(())
    }

    pub async fn remote_event_id_for(
        &self,
        puppet_id: i64,
        room_id: &str,
        local_event_id: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT remote_event_id FROM event_correlations
             WHERE puppet_id = ? AND room_id = ? AND local_event_id = ?",
        )
        .bind(puppet_id)
        .bind(room_id)
        .bind(local_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn local_event_id_for(
        &self,
        puppet_id: i64,
        room_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT local_event_id FROM event_correlations
             WHERE puppet_id = ? AND room_id = ? AND remote_event_id = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(puppet_id)
        .bind(room_id)
        .bind(remote_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directory '{}' for database url '{database_url}'",
                    parent.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
