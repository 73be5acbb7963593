use crate::core::giveaway::{Giveaway, GiveawayError, GiveawayStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;

pub struct SqliteGiveawayStore {
    pool: Pool<Sqlite>,
}

impl SqliteGiveawayStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS giveaways (
                message_id INTEGER PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                prize TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                winner_count INTEGER NOT NULL,
                host_id INTEGER NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                winners TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS giveaway_entries (
                message_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                weight INTEGER NOT NULL DEFAULT 1 CHECK (weight >= 1),
                PRIMARY KEY (message_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn storage(e: sqlx::Error) -> GiveawayError {
    GiveawayError::StorageError(e.to_string())
}

fn row_to_giveaway(row: &SqliteRow) -> Result<Giveaway, GiveawayError> {
    let message_id = row.get::<i64, _>("message_id") as u64;

    let ends_at: String = row.get("ends_at");
    let ends_at = DateTime::parse_from_rfc3339(&ends_at)
        .map_err(|e| {
            GiveawayError::StorageError(format!("bad end time on giveaway {message_id}: {e}"))
        })?
        .with_timezone(&Utc);

    let winners: String = row.get("winners");
    let winners: Vec<u64> = serde_json::from_str(&winners).unwrap_or_else(|e| {
        tracing::warn!(message_id, "Unreadable winners list on giveaway: {}", e);
        Vec::new()
    });

    Ok(Giveaway {
        message_id,
        channel_id: row.get::<i64, _>("channel_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        prize: row.get("prize"),
        ends_at,
        winner_count: row.get::<i64, _>("winner_count").max(0) as u32,
        host_id: row.get::<i64, _>("host_id") as u64,
        active: row.get("active"),
        winners,
    })
}

#[async_trait]
impl GiveawayStore for SqliteGiveawayStore {
    async fn create(&self, giveaway: &Giveaway) -> Result<(), GiveawayError> {
        let winners = serde_json::to_string(&giveaway.winners)
            .map_err(|e| GiveawayError::StorageError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO giveaways
                (message_id, channel_id, guild_id, prize, ends_at, winner_count, host_id, active, winners)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(giveaway.message_id as i64)
        .bind(giveaway.channel_id as i64)
        .bind(giveaway.guild_id as i64)
        .bind(&giveaway.prize)
        .bind(giveaway.ends_at.to_rfc3339())
        .bind(giveaway.winner_count as i64)
        .bind(giveaway.host_id as i64)
        .bind(giveaway.active)
        .bind(winners)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn get(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError> {
        let row = sqlx::query("SELECT * FROM giveaways WHERE message_id = ?")
            .bind(message_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(row_to_giveaway).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError> {
        let rows = sqlx::query("SELECT * FROM giveaways WHERE active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(row_to_giveaway).collect()
    }

    async fn add_entry(
        &self,
        message_id: u64,
        user_id: u64,
        weight: u32,
    ) -> Result<bool, GiveawayError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO giveaway_entries (message_id, user_id, weight) VALUES (?, ?, ?)",
        )
        .bind(message_id as i64)
        .bind(user_id as i64)
        .bind(weight as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn entries(&self, message_id: u64) -> Result<BTreeMap<u64, u32>, GiveawayError> {
        let rows = sqlx::query("SELECT user_id, weight FROM giveaway_entries WHERE message_id = ?")
            .bind(message_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<i64, _>("user_id") as u64,
                    row.get::<i64, _>("weight").max(1) as u32,
                )
            })
            .collect())
    }

    async fn entry_count(&self, message_id: u64) -> Result<u64, GiveawayError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM giveaway_entries WHERE message_id = ?")
                .bind(message_id as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        Ok(count as u64)
    }

    async fn deactivate(&self, message_id: u64) -> Result<bool, GiveawayError> {
        // The `active = 1` guard makes this the single point where a giveaway
        // can end; a second caller sees zero affected rows.
        let result =
            sqlx::query("UPDATE giveaways SET active = 0 WHERE message_id = ? AND active = 1")
                .bind(message_id as i64)
                .execute(&self.pool)
                .await
                .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_winners(&self, message_id: u64, winners: &[u64]) -> Result<(), GiveawayError> {
        let winners =
            serde_json::to_string(winners).map_err(|e| GiveawayError::StorageError(e.to_string()))?;

        sqlx::query("UPDATE giveaways SET winners = ? WHERE message_id = ?")
            .bind(winners)
            .bind(message_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(())
    }
}
