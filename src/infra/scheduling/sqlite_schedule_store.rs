use crate::core::scheduling::{
    RecurringSlot, ScheduleAction, ScheduleError, ScheduleRule, ScheduleStore, WeekdaySet,
};
use async_trait::async_trait;
use chrono::Timelike;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteScheduleStore {
    pool: Pool<Sqlite>,
}

impl SqliteScheduleStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                weekdays INTEGER NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                timezone TEXT NOT NULL,
                action TEXT NOT NULL,
                role_id INTEGER,
                message TEXT,
                purge_limit INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn storage(e: sqlx::Error) -> ScheduleError {
    ScheduleError::StorageError(e.to_string())
}

/// Rebuild a rule from its row. Rows that no longer validate (say, a
/// timezone that was renamed) are skipped with a warning instead of failing
/// the whole listing.
fn row_to_rule(row: &SqliteRow) -> Option<ScheduleRule> {
    let id: i64 = row.get("id");
    let timezone: String = row.get("timezone");

    let slot = match RecurringSlot::new(
        WeekdaySet::from_bits(row.get::<i64, _>("weekdays") as u8),
        row.get::<i64, _>("hour") as u32,
        row.get::<i64, _>("minute") as u32,
        &timezone,
    ) {
        Ok(slot) => slot,
        Err(e) => {
            tracing::warn!(rule_id = id, "Skipping invalid stored schedule: {}", e);
            return None;
        }
    };

    let action = match row.get::<String, _>("action").as_str() {
        "ping" => ScheduleAction::PingRole {
            role_id: row.get::<Option<i64>, _>("role_id").unwrap_or_default() as u64,
            message: row.get::<Option<String>, _>("message").unwrap_or_default(),
        },
        "purge" => ScheduleAction::PurgeChannel {
            limit: row.get::<Option<i64>, _>("purge_limit").unwrap_or(1).max(1) as u32,
        },
        other => {
            tracing::warn!(rule_id = id, action = other, "Skipping schedule with unknown action");
            return None;
        }
    };

    Some(ScheduleRule {
        id,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        channel_id: row.get::<i64, _>("channel_id") as u64,
        slot,
        action,
    })
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn insert(&self, rule: &ScheduleRule) -> Result<i64, ScheduleError> {
        let (role_id, message, purge_limit) = match &rule.action {
            ScheduleAction::PingRole { role_id, message } => {
                (Some(*role_id as i64), Some(message.clone()), None)
            }
            ScheduleAction::PurgeChannel { limit } => (None, None, Some(*limit as i64)),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO schedules
                (guild_id, channel_id, weekdays, hour, minute, timezone, action, role_id, message, purge_limit)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(rule.guild_id as i64)
        .bind(rule.channel_id as i64)
        .bind(rule.slot.weekdays().bits() as i64)
        .bind(rule.slot.time().hour() as i64)
        .bind(rule.slot.time().minute() as i64)
        .bind(rule.slot.timezone().name())
        .bind(rule.action.kind())
        .bind(role_id)
        .bind(message)
        .bind(purge_limit)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.last_insert_rowid())
    }

    async fn list(&self, guild_id: u64) -> Result<Vec<ScheduleRule>, ScheduleError> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE guild_id = ? ORDER BY id")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows.iter().filter_map(row_to_rule).collect())
    }

    async fn list_all(&self) -> Result<Vec<ScheduleRule>, ScheduleError> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows.iter().filter_map(row_to_rule).collect())
    }

    async fn delete(&self, guild_id: u64, rule_id: i64) -> Result<bool, ScheduleError> {
        let result = sqlx::query("DELETE FROM schedules WHERE guild_id = ? AND id = ?")
            .bind(guild_id as i64)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, ScheduleError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedules")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduling::{parse_weekdays, ScheduleService};
    use crate::infra::database::memory_pool;
    use chrono::{TimeZone, Utc};

    async fn store() -> SqliteScheduleStore {
        let store = SqliteScheduleStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        store
    }

    fn ping() -> ScheduleRule {
        ScheduleRule::new(
            1,
            2,
            parse_weekdays("mon,wed,fri").unwrap(),
            14,
            0,
            "America/New_York",
            ScheduleAction::PingRole {
                role_id: 3,
                message: "EU Gem Realm".into(),
            },
        )
        .unwrap()
    }

    fn purge() -> ScheduleRule {
        ScheduleRule::new(
            1,
            2,
            parse_weekdays("mon").unwrap(),
            23,
            30,
            "UTC",
            ScheduleAction::PurgeChannel { limit: 1000 },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rules_roundtrip_through_sqlite() {
        let store = store().await;
        let ping_id = store.insert(&ping()).await.unwrap();
        let purge_id = store.insert(&purge()).await.unwrap();
        assert_ne!(ping_id, purge_id);

        let listed = store.list(1).await.unwrap();
        assert_eq!(listed.len(), 2);

        let mut expected = ping();
        expected.id = ping_id;
        assert_eq!(listed[0], expected);
        assert_eq!(listed[1].action, ScheduleAction::PurgeChannel { limit: 1000 });
        assert!(store.list(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_scoped_to_guild() {
        let store = store().await;
        let id = store.insert(&ping()).await.unwrap();

        assert!(!store.delete(42, id).await.unwrap());
        assert!(store.delete(1, id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_rows_are_skipped() {
        let store = store().await;
        store.insert(&ping()).await.unwrap();
        sqlx::query(
            "INSERT INTO schedules (guild_id, channel_id, weekdays, hour, minute, timezone, action) \
             VALUES (1, 2, 1, 9, 0, 'Not/AZone', 'ping')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn service_reports_due_fires_from_storage() {
        let service = ScheduleService::new(store().await);
        service.seed(vec![ping(), purge()]).await.unwrap();

        // Monday 2024-01-01: 14:00 New York is 19:00 UTC, purge at 23:30 UTC.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let due = service.due(start, end).await.unwrap();

        assert_eq!(due.len(), 2);
        assert_eq!(due[0].at, Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap());
        assert_eq!(due[1].rule.action.kind(), "purge");
    }
}
