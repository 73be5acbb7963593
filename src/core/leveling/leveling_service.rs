// Leveling business logic.
// No serenity or poise in here: everything is keyed by plain u64 ids so the
// rules can be tested without a gateway connection.

#[path = "xp_curve.rs"]
mod xp_curve;

pub use xp_curve::{
    evaluate_award, level_from_xp, reward_roles_gained, reward_roles_lost, RoleRewards, XpStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// One user's XP in one guild.
///
/// `last_award` is the instant the last message award was granted. Manual
/// admin adjustments leave it alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpRecord {
    pub user_id: u64,
    pub guild_id: u64,
    pub xp: u64,
    pub last_award: Option<DateTime<Utc>>,
}

impl XpRecord {
    pub fn empty(user_id: u64, guild_id: u64) -> Self {
        Self {
            user_id,
            guild_id,
            xp: 0,
            last_award: None,
        }
    }

    pub fn level(&self) -> u32 {
        level_from_xp(self.xp)
    }
}

/// Returned when a message award moves a user onto a new level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
}

/// Outcome of a manual XP change made by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAdjustment {
    pub old_xp: u64,
    pub new_xp: u64,
    pub old_level: u32,
    pub new_level: u32,
}

/// One row of the leaderboard. Rank is 1-based and shared by tied XP totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
}

/// Inclusive range a message award is rolled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpRange {
    min: u64,
    max: u64,
}

impl XpRange {
    /// `min` may be zero, `max` must be strictly greater than `min`.
    pub fn new(min: u64, max: u64) -> Result<Self, LevelingError> {
        if max <= min {
            return Err(LevelingError::InvalidXpRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for XpRange {
    fn default() -> Self {
        Self { min: 5, max: 15 }
    }
}

/// Per-guild knobs the service needs for a message award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelingSettings {
    pub cooldown: Duration,
    pub xp_range: XpRange,
}

impl Default for LevelingSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::seconds(60),
            xp_range: XpRange::default(),
        }
    }
}

/// Daily XP rolls over at midnight in this zone.
pub const DAILY_XP_TIMEZONE: Tz = chrono_tz::America::New_York;

/// The daily-XP bucket `now` falls into.
pub fn daily_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&DAILY_XP_TIMEZONE).date_naive()
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("User is on cooldown. Time remaining: {0:?}")]
    OnCooldown(std::time::Duration),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid user or guild ID")]
    InvalidId,

    #[error("Invalid XP range {min}..={max}: max must be greater than min")]
    InvalidXpRange { min: u64, max: u64 },
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait XpStore: Send + Sync {
    /// `None` when the user never earned XP in this guild.
    async fn get_record(&self, user_id: u64, guild_id: u64)
        -> Result<Option<XpRecord>, LevelingError>;

    /// Insert or overwrite the record for (user, guild).
    async fn save_record(&self, record: &XpRecord) -> Result<(), LevelingError>;

    /// Records ordered by xp descending, ties broken by user id.
    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<XpRecord>, LevelingError>;

    /// Number of users in the guild with strictly more xp than `xp`.
    async fn count_above(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError>;

    async fn add_daily_xp(
        &self,
        guild_id: u64,
        user_id: u64,
        date: NaiveDate,
        amount: u64,
    ) -> Result<(), LevelingError>;

    /// The user with the most xp gained on `date`, with that amount.
    async fn daily_top(
        &self,
        guild_id: u64,
        date: NaiveDate,
    ) -> Result<Option<(u64, u64)>, LevelingError>;

    /// Drop every daily counter dated on or before `date`.
    async fn clear_daily(&self, date: NaiveDate) -> Result<u64, LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct LevelingService<S: XpStore> {
    store: S,
}

impl<S: XpStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn validate_ids(user_id: u64, guild_id: u64) -> Result<(), LevelingError> {
        if user_id == 0 || guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    async fn load(&self, user_id: u64, guild_id: u64) -> Result<XpRecord, LevelingError> {
        Ok(self
            .store
            .get_record(user_id, guild_id)
            .await?
            .unwrap_or_else(|| XpRecord::empty(user_id, guild_id)))
    }

    /// Award message XP at `now`.
    ///
    /// - `Ok(Some(event))` the user reached a new level
    /// - `Ok(None)` XP was awarded, same level
    /// - `Err(OnCooldown)` nothing was written
    pub async fn process_message(
        &self,
        user_id: u64,
        guild_id: u64,
        now: DateTime<Utc>,
        settings: &LevelingSettings,
        daily_date: NaiveDate,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        let gain = {
            let mut rng = StdRng::from_entropy();
            settings.xp_range.roll(&mut rng)
        };
        self.award(user_id, guild_id, gain, now, settings.cooldown, daily_date)
            .await
    }

    /// Same as `process_message` with a fixed gain instead of a roll.
    pub async fn award(
        &self,
        user_id: u64,
        guild_id: u64,
        gain: u64,
        now: DateTime<Utc>,
        cooldown: Duration,
        daily_date: NaiveDate,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let mut record = self.load(user_id, guild_id).await?;
        let award = evaluate_award(&record, gain, now, cooldown)?;

        record.xp = award.new_xp;
        record.last_award = Some(now);
        self.store.save_record(&record).await?;

        if gain > 0 {
            self.store
                .add_daily_xp(guild_id, user_id, daily_date, gain)
                .await?;
        }

        if award.leveled_up() {
            Ok(Some(LevelUpEvent {
                user_id,
                guild_id,
                old_level: award.old_level,
                new_level: award.new_level,
                total_xp: award.new_xp,
            }))
        } else {
            Ok(None)
        }
    }

    /// Add (positive) or remove (negative) XP by hand. Clamps at zero.
    /// The cooldown timer is carried over untouched.
    pub async fn adjust_xp(
        &self,
        user_id: u64,
        guild_id: u64,
        delta: i64,
    ) -> Result<XpAdjustment, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let mut record = self.load(user_id, guild_id).await?;
        let old_xp = record.xp;
        record.xp = if delta >= 0 {
            old_xp.saturating_add(delta.unsigned_abs())
        } else {
            old_xp.saturating_sub(delta.unsigned_abs())
        };
        self.store.save_record(&record).await?;

        Ok(XpAdjustment {
            old_xp,
            new_xp: record.xp,
            old_level: level_from_xp(old_xp),
            new_level: level_from_xp(record.xp),
        })
    }

    pub async fn reset_xp(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<XpAdjustment, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let mut record = self.load(user_id, guild_id).await?;
        let old_xp = record.xp;
        record.xp = 0;
        self.store.save_record(&record).await?;

        Ok(XpAdjustment {
            old_xp,
            new_xp: 0,
            old_level: level_from_xp(old_xp),
            new_level: 0,
        })
    }

    pub async fn get_status(&self, user_id: u64, guild_id: u64) -> Result<XpStatus, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        let record = self.load(user_id, guild_id).await?;
        Ok(XpStatus::from_total_xp(record.xp))
    }

    /// 1-based rank: one more than the number of members with strictly more
    /// XP, so ties share a rank. `None` for users with no XP at all.
    pub async fn get_rank(&self, user_id: u64, guild_id: u64) -> Result<Option<u64>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        match self.store.get_record(user_id, guild_id).await? {
            Some(record) if record.xp > 0 => {
                Ok(Some(self.store.count_above(guild_id, record.xp).await? + 1))
            }
            _ => Ok(None),
        }
    }

    pub async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
        if guild_id == 0 {
            return Err(LevelingError::InvalidId);
        }
        let records = self.store.get_leaderboard(guild_id, limit, offset).await?;
        let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            // Same rule as get_rank: a page may open in the middle of a tie.
            let rank = match entries.last() {
                Some(prev) if prev.xp == record.xp => prev.rank,
                Some(_) => (offset + i + 1) as u64,
                None => self.store.count_above(guild_id, record.xp).await? + 1,
            };
            entries.push(LeaderboardEntry {
                rank,
                user_id: record.user_id,
                xp: record.xp,
                level: record.level(),
            });
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------------
    // Daily top gainer
    // ------------------------------------------------------------------------

    pub async fn daily_top_user(
        &self,
        guild_id: u64,
        date: NaiveDate,
    ) -> Result<Option<(u64, u64)>, LevelingError> {
        self.store.daily_top(guild_id, date).await
    }

    pub async fn reset_daily_xp(&self, date: NaiveDate) -> Result<u64, LevelingError> {
        self.store.clear_daily(date).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestStore {
        records: Mutex<HashMap<(u64, u64), XpRecord>>,
        daily: Mutex<HashMap<(u64, u64, NaiveDate), u64>>,
    }

    #[async_trait]
    impl XpStore for TestStore {
        async fn get_record(&self, user_id: u64, guild_id: u64) -> Result<Option<XpRecord>, LevelingError> {
            Ok(self.records.lock().unwrap().get(&(user_id, guild_id)).cloned())
        }

        async fn save_record(&self, record: &XpRecord) -> Result<(), LevelingError> {
            self.records
                .lock()
                .unwrap()
                .insert((record.user_id, record.guild_id), record.clone());
            Ok(())
        }

        async fn get_leaderboard(
            &self,
            guild_id: u64,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<XpRecord>, LevelingError> {
            let mut rows: Vec<XpRecord> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.guild_id == guild_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.user_id.cmp(&b.user_id)));
            Ok(rows.into_iter().skip(offset).take(limit).collect())
        }

        async fn count_above(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.guild_id == guild_id && r.xp > xp)
                .count() as u64)
        }

        async fn add_daily_xp(
            &self,
            guild_id: u64,
            user_id: u64,
            date: NaiveDate,
            amount: u64,
        ) -> Result<(), LevelingError> {
            *self
                .daily
                .lock()
                .unwrap()
                .entry((guild_id, user_id, date))
                .or_default() += amount;
            Ok(())
        }

        async fn daily_top(&self, guild_id: u64, date: NaiveDate) -> Result<Option<(u64, u64)>, LevelingError> {
            Ok(self
                .daily
                .lock()
                .unwrap()
                .iter()
                .filter(|((g, _, d), _)| *g == guild_id && *d == date)
                .map(|((_, u, _), xp)| (*u, *xp))
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0))))
        }

        async fn clear_daily(&self, date: NaiveDate) -> Result<u64, LevelingError> {
            let mut daily = self.daily.lock().unwrap();
            let before = daily.len();
            daily.retain(|(_, _, d), _| *d > date);
            Ok((before - daily.len()) as u64)
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn cooldown_rejection_leaves_record_untouched() {
        let service = LevelingService::new(TestStore::default());
        let cooldown = Duration::seconds(60);

        service.award(1, 9, 10, at(12, 0, 0), cooldown, day()).await.unwrap();
        let before = service.store.get_record(1, 9).await.unwrap();

        let result = service.award(1, 9, 10, at(12, 0, 30), cooldown, day()).await;
        assert!(matches!(result, Err(LevelingError::OnCooldown(_))));

        let after = service.store.get_record(1, 9).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.unwrap().last_award, Some(at(12, 0, 0)));
    }

    #[tokio::test]
    async fn crossing_a_threshold_reports_level_up() {
        let service = LevelingService::new(TestStore::default());
        let cooldown = Duration::seconds(60);

        let first = service.award(1, 9, 90, at(12, 0, 0), cooldown, day()).await.unwrap();
        assert!(first.is_none());

        let second = service.award(1, 9, 15, at(12, 1, 0), cooldown, day()).await.unwrap();
        let event = second.expect("level up");
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 1);
        assert_eq!(event.total_xp, 105);
    }

    #[tokio::test]
    async fn rolled_gain_stays_in_range() {
        let service = LevelingService::new(TestStore::default());
        let settings = LevelingSettings {
            cooldown: Duration::zero(),
            xp_range: XpRange::new(5, 15).unwrap(),
        };

        service.process_message(1, 9, at(12, 0, 0), &settings, day()).await.unwrap();
        let xp = service.store.get_record(1, 9).await.unwrap().unwrap().xp;
        assert!((5..=15).contains(&xp));
    }

    #[tokio::test]
    async fn manual_adjustment_clamps_and_keeps_cooldown() {
        let service = LevelingService::new(TestStore::default());
        service
            .award(1, 9, 50, at(12, 0, 0), Duration::seconds(60), day())
            .await
            .unwrap();

        let added = service.adjust_xp(1, 9, 200).await.unwrap();
        assert_eq!(added.new_xp, 250);
        assert_eq!(added.new_level, 2);

        let removed = service.adjust_xp(1, 9, -1_000).await.unwrap();
        assert_eq!(removed.new_xp, 0);

        let record = service.store.get_record(1, 9).await.unwrap().unwrap();
        assert_eq!(record.last_award, Some(at(12, 0, 0)));

        let still_blocked = service
            .award(1, 9, 5, at(12, 0, 10), Duration::seconds(60), day())
            .await;
        assert!(matches!(still_blocked, Err(LevelingError::OnCooldown(_))));
    }

    #[tokio::test]
    async fn rank_and_leaderboard_agree() {
        let service = LevelingService::new(TestStore::default());
        for (user, xp) in [(1, 500), (2, 300), (3, 700)] {
            service.adjust_xp(user, 9, xp).await.unwrap();
        }
        service.adjust_xp(4, 10, 900).await.unwrap();

        let board = service.get_leaderboard(9, 10, 0).await.unwrap();
        let users: Vec<u64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![3, 1, 2]);
        assert_eq!(board[1].rank, 2);

        assert_eq!(service.get_rank(2, 9).await.unwrap(), Some(3));
        assert_eq!(service.get_rank(42, 9).await.unwrap(), None);

        let second_page = service.get_leaderboard(9, 2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].rank, 3);
    }

    #[tokio::test]
    async fn tied_members_share_a_rank_everywhere() {
        let service = LevelingService::new(TestStore::default());
        for (user, xp) in [(1, 500), (2, 500), (3, 300), (4, 300), (5, 100)] {
            service.adjust_xp(user, 9, xp).await.unwrap();
        }

        let board = service.get_leaderboard(9, 10, 0).await.unwrap();
        let ranks: Vec<u64> = board.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3, 3, 5]);

        for entry in &board {
            assert_eq!(
                service.get_rank(entry.user_id, 9).await.unwrap(),
                Some(entry.rank)
            );
        }

        // Second page opens in the middle of the 300 XP tie.
        let page = service.get_leaderboard(9, 2, 3).await.unwrap();
        let ranks: Vec<(u64, u64)> = page.iter().map(|e| (e.user_id, e.rank)).collect();
        assert_eq!(ranks, vec![(4, 3), (5, 5)]);
    }

    #[tokio::test]
    async fn daily_top_gainer_and_reset() {
        let service = LevelingService::new(TestStore::default());
        let cooldown = Duration::zero();
        service.award(1, 9, 40, at(12, 0, 0), cooldown, day()).await.unwrap();
        service.award(2, 9, 25, at(12, 0, 0), cooldown, day()).await.unwrap();
        service.award(2, 9, 25, at(12, 5, 0), cooldown, day()).await.unwrap();

        assert_eq!(service.daily_top_user(9, day()).await.unwrap(), Some((2, 50)));

        assert_eq!(service.reset_daily_xp(day()).await.unwrap(), 2);
        assert_eq!(service.daily_top_user(9, day()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ids_are_rejected() {
        let service = LevelingService::new(TestStore::default());
        assert!(matches!(
            service.get_status(0, 9).await,
            Err(LevelingError::InvalidId)
        ));
    }

    #[test]
    fn xp_range_requires_max_above_min() {
        assert!(XpRange::new(0, 1).is_ok());
        assert!(matches!(
            XpRange::new(10, 10),
            Err(LevelingError::InvalidXpRange { min: 10, max: 10 })
        ));
    }

    #[test]
    fn leveling_error_messages_are_descriptive() {
        let storage_error = LevelingError::StorageError("db down".into());
        assert!(storage_error.to_string().contains("db down"));
        assert_eq!(LevelingError::InvalidId.to_string(), "Invalid user or guild ID");
    }

    #[test]
    fn daily_bucket_follows_new_york_midnight() {
        // 03:30 UTC on the 2nd is still the evening of the 1st in New York.
        let late = Utc.with_ymd_and_hms(2024, 6, 2, 3, 30, 0).unwrap();
        assert_eq!(daily_date(late), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

        let after_midnight = Utc.with_ymd_and_hms(2024, 6, 2, 4, 0, 0).unwrap();
        assert_eq!(
            daily_date(after_midnight),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
        );
    }
}
