use crate::core::leveling::{LevelingError, XpRecord, XpStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteXpStore {
    pool: Pool<Sqlite>,
}

impl SqliteXpStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        // `level` is a display cache written in the same statement as `xp`;
        // the service always recomputes it from xp.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS xp_records (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 0,
                last_award TEXT,
                PRIMARY KEY (user_id, guild_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_xp_records_guild_xp ON xp_records (guild_id, xp DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_xp (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, user_id, day)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn storage(e: sqlx::Error) -> LevelingError {
    LevelingError::StorageError(e.to_string())
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn row_to_record(row: &SqliteRow) -> XpRecord {
    let last_award: Option<String> = row.get("last_award");
    XpRecord {
        user_id: row.get::<i64, _>("user_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        xp: row.get::<i64, _>("xp").max(0) as u64,
        last_award: last_award
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[async_trait]
impl XpStore for SqliteXpStore {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<XpRecord>, LevelingError> {
        let row = sqlx::query(
            "SELECT user_id, guild_id, xp, last_award FROM xp_records WHERE user_id = ? AND guild_id = ?",
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn save_record(&self, record: &XpRecord) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO xp_records (user_id, guild_id, xp, level, last_award)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                xp = excluded.xp,
                level = excluded.level,
                last_award = excluded.last_award
            "#,
        )
        .bind(record.user_id as i64)
        .bind(record.guild_id as i64)
        .bind(record.xp.min(i64::MAX as u64) as i64)
        .bind(record.level() as i64)
        .bind(record.last_award.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<XpRecord>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, guild_id, xp, last_award
            FROM xp_records
            WHERE guild_id = ? AND xp > 0
            ORDER BY xp DESC, user_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn count_above(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM xp_records WHERE guild_id = ? AND xp > ?")
                .bind(guild_id as i64)
                .bind(xp.min(i64::MAX as u64) as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        Ok(count as u64)
    }

    async fn add_daily_xp(
        &self,
        guild_id: u64,
        user_id: u64,
        date: NaiveDate,
        amount: u64,
    ) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO daily_xp (guild_id, user_id, day, xp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id, user_id, day) DO UPDATE SET xp = xp + excluded.xp
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(day_key(date))
        .bind(amount as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn daily_top(
        &self,
        guild_id: u64,
        date: NaiveDate,
    ) -> Result<Option<(u64, u64)>, LevelingError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, xp FROM daily_xp
            WHERE guild_id = ? AND day = ?
            ORDER BY xp DESC, user_id ASC
            LIMIT 1
            "#,
        )
        .bind(guild_id as i64)
        .bind(day_key(date))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|row| {
            (
                row.get::<i64, _>("user_id") as u64,
                row.get::<i64, _>("xp").max(0) as u64,
            )
        }))
    }

    async fn clear_daily(&self, date: NaiveDate) -> Result<u64, LevelingError> {
        let result = sqlx::query("DELETE FROM daily_xp WHERE day <= ?")
            .bind(day_key(date))
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected())
    }
}
