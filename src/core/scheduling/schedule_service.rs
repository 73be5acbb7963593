// Scheduled role pings and channel purges.
//
// A rule says "on these weekdays at this local time, do this in that
// channel". The runner asks for every fire inside a half-open window
// [start, end) and then moves the window forward, so each slot fires exactly
// once no matter how often the loop wakes up.

#[path = "recurring_slot.rs"]
mod recurring_slot;

pub use recurring_slot::{parse_time_of_day, parse_weekdays, RecurringSlot, WeekdaySet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Timezone applied to configured schedules that don't name one.
pub const DEFAULT_SCHEDULE_TIMEZONE: &str = "America/New_York";

/// How many messages a purge removes unless told otherwise.
pub const DEFAULT_PURGE_LIMIT: u32 = 1000;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleAction {
    PingRole { role_id: u64, message: String },
    PurgeChannel { limit: u32 },
}

impl ScheduleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleAction::PingRole { .. } => "ping",
            ScheduleAction::PurgeChannel { .. } => "purge",
        }
    }
}

/// A stored schedule. `id` is 0 until the store assigns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    pub id: i64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub slot: RecurringSlot,
    pub action: ScheduleAction,
}

impl ScheduleRule {
    /// Validates everything up front: weekdays, clock time, timezone name and
    /// the action's own fields.
    pub fn new(
        guild_id: u64,
        channel_id: u64,
        weekdays: WeekdaySet,
        hour: u32,
        minute: u32,
        timezone: &str,
        action: ScheduleAction,
    ) -> Result<Self, ScheduleError> {
        if guild_id == 0 || channel_id == 0 {
            return Err(ScheduleError::InvalidId);
        }
        match &action {
            ScheduleAction::PingRole { role_id: 0, .. } => return Err(ScheduleError::InvalidId),
            ScheduleAction::PurgeChannel { limit: 0 } => {
                return Err(ScheduleError::InvalidPurgeLimit)
            }
            _ => {}
        }

        Ok(Self {
            id: 0,
            guild_id,
            channel_id,
            slot: RecurringSlot::new(weekdays, hour, minute, timezone)?,
            action,
        })
    }

    pub fn next_fire(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.slot.next_fire(reference)
    }
}

/// One slot that came due inside a runner window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFire {
    pub rule: ScheduleRule,
    pub at: DateTime<Utc>,
}

/// The shape schedules take in the bot config file.
///
/// Days are 0 = Monday through 6 = Sunday. A schedule with a delete time
/// turns into two rules: the ping and a purge of the same channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PingSchedule {
    pub role_id: u64,
    pub channel_id: u64,
    pub hour: u32,
    pub minute: u32,
    pub days: Vec<u8>,
    pub message: String,
    #[serde(default)]
    pub delete_hour: Option<u32>,
    #[serde(default)]
    pub delete_minute: Option<u32>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl PingSchedule {
    pub fn into_rules(self, guild_id: u64) -> Result<Vec<ScheduleRule>, ScheduleError> {
        let weekdays = WeekdaySet::from_indices(&self.days)?;
        let timezone = self
            .timezone
            .as_deref()
            .unwrap_or(DEFAULT_SCHEDULE_TIMEZONE)
            .to_string();

        let mut rules = vec![ScheduleRule::new(
            guild_id,
            self.channel_id,
            weekdays,
            self.hour,
            self.minute,
            &timezone,
            ScheduleAction::PingRole {
                role_id: self.role_id,
                message: self.message,
            },
        )?];

        if let Some(delete_hour) = self.delete_hour {
            rules.push(ScheduleRule::new(
                guild_id,
                self.channel_id,
                weekdays,
                delete_hour,
                self.delete_minute.unwrap_or(0),
                &timezone,
                ScheduleAction::PurgeChannel {
                    limit: DEFAULT_PURGE_LIMIT,
                },
            )?);
        }

        Ok(rules)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("A schedule needs at least one weekday")]
    EmptyWeekdays,

    #[error("Unknown weekday: {0}")]
    InvalidWeekday(String),

    #[error("Invalid time {hour:02}:{minute:02}: hour must be 0-23 and minute 0-59")]
    InvalidTime { hour: u32, minute: u32 },

    #[error("Time must look like HH:MM, got {0:?}")]
    InvalidTimeFormat(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Purge limit must be at least 1")]
    InvalidPurgeLimit,

    #[error("Invalid guild, channel or role ID")]
    InvalidId,

    #[error("No schedule with id {0}")]
    NotFound(i64),

    #[error("Storage error: {0}")]
    StorageError(String),
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Store a new rule and return its id.
    async fn insert(&self, rule: &ScheduleRule) -> Result<i64, ScheduleError>;
    async fn list(&self, guild_id: u64) -> Result<Vec<ScheduleRule>, ScheduleError>;
    async fn list_all(&self) -> Result<Vec<ScheduleRule>, ScheduleError>;
    /// `true` when a row was removed.
    async fn delete(&self, guild_id: u64, rule_id: i64) -> Result<bool, ScheduleError>;
    async fn count(&self) -> Result<u64, ScheduleError>;
}

// ============================================================================
// PURE HELPERS
// ============================================================================

/// Every (rule, instant) with `window_start <= instant < window_end`, in
/// time order.
pub fn due_fires(
    rules: &[ScheduleRule],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<DueFire> {
    let mut fires = Vec::new();

    for rule in rules {
        let mut cursor = window_start;
        while let Some(at) = rule.next_fire(cursor) {
            if at >= window_end {
                break;
            }
            fires.push(DueFire {
                rule: rule.clone(),
                at,
            });
            cursor = at + Duration::seconds(1);
        }
    }

    fires.sort_by(|a, b| a.at.cmp(&b.at).then(a.rule.id.cmp(&b.rule.id)));
    fires
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct ScheduleService<S: ScheduleStore> {
    store: S,
}

impl<S: ScheduleStore> ScheduleService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn add(&self, mut rule: ScheduleRule) -> Result<ScheduleRule, ScheduleError> {
        rule.id = self.store.insert(&rule).await?;
        Ok(rule)
    }

    pub async fn list(&self, guild_id: u64) -> Result<Vec<ScheduleRule>, ScheduleError> {
        self.store.list(guild_id).await
    }

    pub async fn get(&self, guild_id: u64, rule_id: i64) -> Result<ScheduleRule, ScheduleError> {
        self.store
            .list(guild_id)
            .await?
            .into_iter()
            .find(|rule| rule.id == rule_id)
            .ok_or(ScheduleError::NotFound(rule_id))
    }

    pub async fn remove(&self, guild_id: u64, rule_id: i64) -> Result<(), ScheduleError> {
        if self.store.delete(guild_id, rule_id).await? {
            Ok(())
        } else {
            Err(ScheduleError::NotFound(rule_id))
        }
    }

    /// Insert `rules` only when the store holds no schedules at all, so
    /// restarting the bot never duplicates configured schedules.
    pub async fn seed(&self, rules: Vec<ScheduleRule>) -> Result<usize, ScheduleError> {
        if self.store.count().await? > 0 {
            return Ok(0);
        }
        let count = rules.len();
        for rule in rules {
            self.store.insert(&rule).await?;
        }
        Ok(count)
    }

    pub async fn due(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<DueFire>, ScheduleError> {
        let rules = self.store.list_all().await?;
        Ok(due_fires(&rules, window_start, window_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestStore {
        rules: Mutex<Vec<ScheduleRule>>,
    }

    #[async_trait]
    impl ScheduleStore for TestStore {
        async fn insert(&self, rule: &ScheduleRule) -> Result<i64, ScheduleError> {
            let mut rules = self.rules.lock().unwrap();
            let id = rules.len() as i64 + 1;
            let mut stored = rule.clone();
            stored.id = id;
            rules.push(stored);
            Ok(id)
        }

        async fn list(&self, guild_id: u64) -> Result<Vec<ScheduleRule>, ScheduleError> {
            Ok(self
                .rules
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.guild_id == guild_id)
                .cloned()
                .collect())
        }

        async fn list_all(&self) -> Result<Vec<ScheduleRule>, ScheduleError> {
            Ok(self.rules.lock().unwrap().clone())
        }

        async fn delete(&self, guild_id: u64, rule_id: i64) -> Result<bool, ScheduleError> {
            let mut rules = self.rules.lock().unwrap();
            let before = rules.len();
            rules.retain(|r| !(r.guild_id == guild_id && r.id == rule_id));
            Ok(rules.len() != before)
        }

        async fn count(&self) -> Result<u64, ScheduleError> {
            Ok(self.rules.lock().unwrap().len() as u64)
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn ping_rule(days: &str, hour: u32) -> ScheduleRule {
        ScheduleRule::new(
            1,
            2,
            parse_weekdays(days).unwrap(),
            hour,
            0,
            "UTC",
            ScheduleAction::PingRole {
                role_id: 3,
                message: "Gem realm".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn contiguous_windows_fire_each_slot_once() {
        let rules = vec![ping_rule("mon,wed,fri", 14)];
        let start = utc(2024, 1, 1, 0, 0);

        // Uneven tick lengths, like a loop that wakes up late now and then.
        let mut fires = Vec::new();
        let mut window_start = start;
        for step in [1i64, 7, 30, 59, 61, 3, 120].iter().cycle().take(400) {
            let window_end = window_start + Duration::minutes(*step);
            fires.extend(due_fires(&rules, window_start, window_end));
            window_start = window_end;
        }

        let times: Vec<DateTime<Utc>> = fires.iter().map(|f| f.at).collect();
        let mut deduped = times.clone();
        deduped.dedup();
        assert_eq!(times, deduped);
        assert_eq!(times[0], utc(2024, 1, 1, 14, 0));
        assert_eq!(times[1], utc(2024, 1, 3, 14, 0));
        assert_eq!(times[2], utc(2024, 1, 5, 14, 0));
        assert_eq!(times[3], utc(2024, 1, 8, 14, 0));
    }

    #[test]
    fn window_is_half_open() {
        let rules = vec![ping_rule("mon", 14)];
        let fire = utc(2024, 1, 1, 14, 0);

        assert!(due_fires(&rules, fire - Duration::minutes(1), fire).is_empty());
        assert_eq!(due_fires(&rules, fire, fire + Duration::minutes(1)).len(), 1);
    }

    #[test]
    fn rule_validation_rejects_bad_actions() {
        let days: WeekdaySet = [Weekday::Mon].into_iter().collect();
        assert!(matches!(
            ScheduleRule::new(1, 2, days, 9, 0, "UTC", ScheduleAction::PurgeChannel { limit: 0 }),
            Err(ScheduleError::InvalidPurgeLimit)
        ));
        assert!(matches!(
            ScheduleRule::new(
                1,
                2,
                days,
                9,
                0,
                "UTC",
                ScheduleAction::PingRole { role_id: 0, message: String::new() }
            ),
            Err(ScheduleError::InvalidId)
        ));
    }

    #[test]
    fn ping_schedule_with_delete_time_expands_to_two_rules() {
        let config: PingSchedule = serde_json::from_str(
            r#"{"role_id": 5, "channel_id": 6, "hour": 14, "minute": 0,
                "days": [1, 3, 5], "message": "EU Gem Realm",
                "delete_hour": 23, "delete_minute": 30}"#,
        )
        .unwrap();

        let rules = config.into_rules(9).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].slot.timezone().name(), DEFAULT_SCHEDULE_TIMEZONE);
        assert_eq!(rules[1].action, ScheduleAction::PurgeChannel { limit: DEFAULT_PURGE_LIMIT });
        assert_eq!(rules[1].slot.time().format("%H:%M").to_string(), "23:30");
        assert!(rules[0].slot.weekdays().contains(Weekday::Tue));
    }

    #[test]
    fn ping_schedule_rejects_out_of_range_day() {
        let config = PingSchedule {
            role_id: 5,
            channel_id: 6,
            hour: 14,
            minute: 0,
            days: vec![9],
            message: "x".into(),
            delete_hour: None,
            delete_minute: None,
            timezone: None,
        };
        assert!(matches!(config.into_rules(9), Err(ScheduleError::InvalidWeekday(_))));
    }

    #[tokio::test]
    async fn seeding_only_happens_on_empty_store() {
        let service = ScheduleService::new(TestStore::default());

        assert_eq!(service.seed(vec![ping_rule("mon", 9)]).await.unwrap(), 1);
        assert_eq!(service.seed(vec![ping_rule("tue", 9)]).await.unwrap(), 0);
        assert_eq!(service.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_reports_missing_rules() {
        let service = ScheduleService::new(TestStore::default());
        let added = service.add(ping_rule("mon", 9)).await.unwrap();

        assert_eq!(service.get(1, added.id).await.unwrap().id, added.id);
        service.remove(1, added.id).await.unwrap();
        assert!(matches!(
            service.remove(1, added.id).await,
            Err(ScheduleError::NotFound(_))
        ));
    }
}
