use crate::core::settings::{GuildSettings, GuildSettingsStore, SettingsError};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteSettingsStore {
    pool: Pool<Sqlite>,
}

impl SqliteSettingsStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id INTEGER PRIMARY KEY,
                welcome_channel_id INTEGER,
                levelup_channel_id INTEGER,
                xp_cooldown_secs INTEGER,
                xp_min INTEGER,
                xp_max INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn opt_u64(row: &SqliteRow, column: &str) -> Option<u64> {
    row.get::<Option<i64>, _>(column).map(|v| v as u64)
}

fn row_to_settings(row: &SqliteRow) -> GuildSettings {
    GuildSettings {
        guild_id: row.get::<i64, _>("guild_id") as u64,
        welcome_channel_id: opt_u64(row, "welcome_channel_id"),
        levelup_channel_id: opt_u64(row, "levelup_channel_id"),
        xp_cooldown_secs: opt_u64(row, "xp_cooldown_secs"),
        xp_min: opt_u64(row, "xp_min"),
        xp_max: opt_u64(row, "xp_max"),
    }
}

#[async_trait]
impl GuildSettingsStore for SqliteSettingsStore {
    async fn load_all(&self) -> Result<Vec<GuildSettings>, SettingsError> {
        let rows = sqlx::query("SELECT * FROM guild_settings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SettingsError::StorageError(e.to_string()))?;

        Ok(rows.iter().map(row_to_settings).collect())
    }

    async fn save(&self, settings: &GuildSettings) -> Result<(), SettingsError> {
        let to_i64 = |v: Option<u64>| v.map(|v| v as i64);

        sqlx::query(
            r#"
            INSERT INTO guild_settings
                (guild_id, welcome_channel_id, levelup_channel_id, xp_cooldown_secs, xp_min, xp_max)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                welcome_channel_id = excluded.welcome_channel_id,
                levelup_channel_id = excluded.levelup_channel_id,
                xp_cooldown_secs = excluded.xp_cooldown_secs,
                xp_min = excluded.xp_min,
                xp_max = excluded.xp_max
            "#,
        )
        .bind(settings.guild_id as i64)
        .bind(to_i64(settings.welcome_channel_id))
        .bind(to_i64(settings.levelup_channel_id))
        .bind(to_i64(settings.xp_cooldown_secs))
        .bind(to_i64(settings.xp_min))
        .bind(to_i64(settings.xp_max))
        .execute(&self.pool)
        .await
        .map_err(|e| SettingsError::StorageError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::{SettingsDefaults, SettingsService};
    use crate::infra::database::memory_pool;

    #[tokio::test]
    async fn settings_persist_across_service_instances() {
        let pool = memory_pool().await;
        let store = SqliteSettingsStore::new(pool.clone());
        store.migrate().await.unwrap();

        let service = SettingsService::new(store, SettingsDefaults::default());
        service.set_welcome_channel(1, 10).await.unwrap();
        service.set_levelup_channel(1, 20).await.unwrap();
        service.set_xp_range(1, 2, 8).await.unwrap();
        service.set_welcome_channel(2, 30).await.unwrap();

        let reloaded = SettingsService::new(SqliteSettingsStore::new(pool), SettingsDefaults::default());
        assert_eq!(reloaded.load().await.unwrap(), 2);

        let settings = reloaded.get(1);
        assert_eq!(settings.welcome_channel_id, Some(10));
        assert_eq!(settings.levelup_channel_id, Some(20));
        assert_eq!(settings.xp_min, Some(2));
        assert_eq!(settings.xp_max, Some(8));
        assert_eq!(settings.xp_cooldown_secs, None);
        assert_eq!(reloaded.welcome_channel(2), Some(30));
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = SqliteSettingsStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
