// Pure XP math: the level curve, cooldown gating, and reward thresholds.
//
// Nothing in here touches storage or the clock. The service passes `now` in,
// which keeps every rule in this file testable with plain values.

use super::{LevelingError, XpRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// XP needed for level 1. Every later threshold scales from this.
const BASE_XP: f64 = 100.0;

/// Growth exponent of the curve. Higher values make later levels slower.
const CURVE_EXPONENT: f64 = 1.30;

/// Total XP required to *reach* `level`.
///
/// Level 0 is free; after that the threshold is `floor(100 * level^1.30)`.
/// Level 1 = 100 XP, level 2 = 246 XP, level 10 = 1995 XP.
pub fn xp_for_level(level: u32) -> u64 {
    if level == 0 {
        return 0;
    }
    (BASE_XP * f64::from(level).powf(CURVE_EXPONENT)) as u64
}

/// The highest level whose threshold is at or below `xp`.
///
/// We start from the inverse of the curve and then nudge the estimate in
/// both directions, so float rounding can never hand back a level the
/// integer thresholds disagree with.
pub fn level_from_xp(xp: u64) -> u32 {
    let estimate = (xp as f64 / BASE_XP).powf(1.0 / CURVE_EXPONENT);
    let mut level = estimate.floor() as u32;

    while level > 0 && xp_for_level(level) > xp {
        level -= 1;
    }
    while let Some(next) = level.checked_add(1) {
        if xp_for_level(next) > xp {
            break;
        }
        level = next;
    }

    level
}

/// Snapshot of where a total XP value sits on the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpStatus {
    pub total_xp: u64,
    pub level: u32,
    pub start_of_level_xp: u64,
    pub next_level_xp: u64,
    pub xp_into_level: u64,
    pub xp_to_next: u64,
}

impl XpStatus {
    pub fn from_total_xp(total_xp: u64) -> Self {
        let level = level_from_xp(total_xp);
        let start = xp_for_level(level);
        let next = xp_for_level(level.saturating_add(1));

        Self {
            total_xp,
            level,
            start_of_level_xp: start,
            next_level_xp: next,
            xp_into_level: total_xp.saturating_sub(start),
            xp_to_next: next.saturating_sub(total_xp),
        }
    }

    /// Fraction of the current level completed, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        let span = self.next_level_xp.saturating_sub(self.start_of_level_xp);
        if span == 0 {
            return 0.0;
        }
        (self.xp_into_level as f64 / span as f64).clamp(0.0, 1.0)
    }
}

/// The result of applying an XP gain to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAward {
    pub old_xp: u64,
    pub new_xp: u64,
    pub old_level: u32,
    pub new_level: u32,
}

impl XpAward {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Decide whether `record` may receive `gain` at `now`.
///
/// Returns `OnCooldown` with the remaining wait when the last award is more
/// recent than `cooldown`. A zero cooldown never blocks.
pub fn evaluate_award(
    record: &XpRecord,
    gain: u64,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<XpAward, LevelingError> {
    if cooldown > Duration::zero() {
        if let Some(last) = record.last_award {
            let elapsed = now - last;
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).to_std().unwrap_or_default();
                return Err(LevelingError::OnCooldown(remaining));
            }
        }
    }

    let new_xp = record.xp.saturating_add(gain);
    Ok(XpAward {
        old_xp: record.xp,
        new_xp,
        old_level: level_from_xp(record.xp),
        new_level: level_from_xp(new_xp),
    })
}

/// Level threshold -> role id.
pub type RoleRewards = BTreeMap<u32, u64>;

/// Reward roles whose threshold was crossed going up from `old` to `new`.
pub fn reward_roles_gained(rewards: &RoleRewards, old_level: u32, new_level: u32) -> Vec<u64> {
    if new_level <= old_level {
        return Vec::new();
    }
    rewards
        .range(old_level + 1..=new_level)
        .map(|(_, role_id)| *role_id)
        .collect()
}

/// Reward roles whose threshold was crossed going down from `old` to `new`.
pub fn reward_roles_lost(rewards: &RoleRewards, old_level: u32, new_level: u32) -> Vec<u64> {
    if new_level >= old_level {
        return Vec::new();
    }
    rewards
        .range(new_level + 1..=old_level)
        .map(|(_, role_id)| *role_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(xp: u64, last_award: Option<DateTime<Utc>>) -> XpRecord {
        XpRecord {
            user_id: 1,
            guild_id: 2,
            xp,
            last_award,
        }
    }

    #[test]
    fn thresholds_follow_the_curve() {
        assert_eq!(xp_for_level(0), 0);
        assert_eq!(xp_for_level(1), 100);
        assert_eq!(xp_for_level(2), 246);
        assert_eq!(xp_for_level(3), 417);
        assert_eq!(xp_for_level(10), 1995);
    }

    #[test]
    fn level_is_highest_threshold_reached() {
        assert_eq!(level_from_xp(0), 0);
        assert_eq!(level_from_xp(99), 0);
        assert_eq!(level_from_xp(100), 1);
        assert_eq!(level_from_xp(245), 1);
        assert_eq!(level_from_xp(246), 2);
        assert_eq!(level_from_xp(1994), 9);
        assert_eq!(level_from_xp(1995), 10);
    }

    #[test]
    fn level_never_decreases_as_xp_grows() {
        let mut previous = 0;
        for xp in 0..60_000u64 {
            let level = level_from_xp(xp);
            assert!(level >= previous, "level dropped at xp={xp}");
            previous = level;
        }
    }

    #[test]
    fn level_agrees_with_thresholds_at_every_boundary() {
        for level in 1..500u32 {
            let threshold = xp_for_level(level);
            assert_eq!(level_from_xp(threshold), level);
            assert_eq!(level_from_xp(threshold - 1), level - 1);
        }
    }

    #[test]
    fn huge_xp_does_not_overflow() {
        let level = level_from_xp(u64::MAX);
        assert!(level > 0);
    }

    #[test]
    fn status_reports_progress_inside_level() {
        let status = XpStatus::from_total_xp(300);
        assert_eq!(status.level, 2);
        assert_eq!(status.start_of_level_xp, 246);
        assert_eq!(status.next_level_xp, 417);
        assert_eq!(status.xp_into_level, 54);
        assert_eq!(status.xp_to_next, 117);
        assert!(status.progress() > 0.3 && status.progress() < 0.33);
    }

    #[test]
    fn award_inside_cooldown_is_rejected() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = last + Duration::seconds(20);

        let result = evaluate_award(&record(50, Some(last)), 10, now, Duration::seconds(60));

        match result {
            Err(LevelingError::OnCooldown(remaining)) => assert_eq!(remaining.as_secs(), 40),
            other => panic!("expected cooldown, got {other:?}"),
        }
    }

    #[test]
    fn award_after_cooldown_detects_level_up() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = last + Duration::seconds(60);

        let award = evaluate_award(&record(95, Some(last)), 10, now, Duration::seconds(60)).unwrap();

        assert_eq!(award.old_xp, 95);
        assert_eq!(award.new_xp, 105);
        assert_eq!(award.old_level, 0);
        assert_eq!(award.new_level, 1);
        assert!(award.leveled_up());
    }

    #[test]
    fn zero_cooldown_always_allows() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let award = evaluate_award(&record(0, Some(now)), 5, now, Duration::zero()).unwrap();
        assert_eq!(award.new_xp, 5);
        assert!(!award.leveled_up());
    }

    #[test]
    fn reward_roles_follow_threshold_crossings() {
        let rewards: RoleRewards = [(1, 11), (10, 22), (25, 33)].into_iter().collect();

        assert_eq!(reward_roles_gained(&rewards, 0, 1), vec![11]);
        assert_eq!(reward_roles_gained(&rewards, 1, 26), vec![22, 33]);
        assert!(reward_roles_gained(&rewards, 10, 11).is_empty());
        assert!(reward_roles_gained(&rewards, 5, 3).is_empty());

        assert_eq!(reward_roles_lost(&rewards, 26, 0), vec![11, 22, 33]);
        assert_eq!(reward_roles_lost(&rewards, 12, 9), vec![22]);
        assert!(reward_roles_lost(&rewards, 3, 5).is_empty());
    }
}
