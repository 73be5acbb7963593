// Giveaway lifecycle: start, collect entries, end on time, draw, reroll.
//
// The store holds the giveaway row and its entrants. Ending a giveaway is a
// single "active -> inactive" flip in storage; whoever wins that flip draws
// the winners, so the watcher and a manual /giveaway end can race safely.

#[path = "winner_draw.rs"]
mod winner_draw;

pub use winner_draw::{draw_winners, parse_message_id, weight_for_roles, ShortfallPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Giveaway {
    /// Id of the announcement message; doubles as the giveaway id.
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: u64,
    pub prize: String,
    pub ends_at: DateTime<Utc>,
    pub winner_count: u32,
    pub host_id: u64,
    pub active: bool,
    pub winners: Vec<u64>,
}

impl Giveaway {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.ends_at
    }
}

/// Everything needed to open a giveaway once its message has been posted.
#[derive(Debug, Clone)]
pub struct NewGiveaway {
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: u64,
    pub host_id: u64,
    pub prize: String,
    pub duration: Duration,
    pub winner_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Entered { total_entries: u64 },
    AlreadyEntered,
    Closed,
}

/// Winners drawn when a giveaway ends (or is rerolled).
#[derive(Debug, Clone)]
pub struct DrawResult {
    pub giveaway: Giveaway,
    pub winners: Vec<u64>,
    pub entrant_count: usize,
    /// Entrants still allowed to win, e.g. those who haven't left the guild.
    pub eligible_count: usize,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum GiveawayError {
    #[error("Duration must be greater than zero")]
    InvalidDuration,

    #[error("Winner count must be greater than zero")]
    InvalidWinnerCount,

    #[error("Not enough entrants: wanted {requested} winners but only {available} entered")]
    InsufficientEntrants { requested: usize, available: usize },

    #[error("Entrant {0} has a weight of zero")]
    InvalidWeight(u64),

    #[error("Could not draw winners: {0}")]
    DrawFailed(String),

    #[error("No giveaway found for message {0}")]
    NotFound(u64),

    #[error("Giveaway {0} is still running")]
    StillActive(u64),

    #[error("Storage error: {0}")]
    StorageError(String),
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait GiveawayStore: Send + Sync {
    async fn create(&self, giveaway: &Giveaway) -> Result<(), GiveawayError>;
    async fn get(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError>;
    async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError>;

    /// `false` if the user was already entered.
    async fn add_entry(&self, message_id: u64, user_id: u64, weight: u32)
        -> Result<bool, GiveawayError>;
    async fn entries(&self, message_id: u64) -> Result<BTreeMap<u64, u32>, GiveawayError>;
    async fn entry_count(&self, message_id: u64) -> Result<u64, GiveawayError>;

    /// Flip an active giveaway to inactive. `false` if it was not active.
    async fn deactivate(&self, message_id: u64) -> Result<bool, GiveawayError>;
    async fn set_winners(&self, message_id: u64, winners: &[u64]) -> Result<(), GiveawayError>;
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct GiveawayService<S: GiveawayStore> {
    store: S,
    policy: ShortfallPolicy,
}

impl<S: GiveawayStore> GiveawayService<S> {
    pub fn new(store: S, policy: ShortfallPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn start(
        &self,
        new: NewGiveaway,
        now: DateTime<Utc>,
    ) -> Result<Giveaway, GiveawayError> {
        if new.duration <= Duration::zero() {
            return Err(GiveawayError::InvalidDuration);
        }
        if new.winner_count == 0 {
            return Err(GiveawayError::InvalidWinnerCount);
        }

        let giveaway = Giveaway {
            message_id: new.message_id,
            channel_id: new.channel_id,
            guild_id: new.guild_id,
            prize: new.prize,
            ends_at: now + new.duration,
            winner_count: new.winner_count,
            host_id: new.host_id,
            active: true,
            winners: Vec::new(),
        };
        self.store.create(&giveaway).await?;
        Ok(giveaway)
    }

    pub async fn get(&self, message_id: u64) -> Result<Giveaway, GiveawayError> {
        self.store
            .get(message_id)
            .await?
            .ok_or(GiveawayError::NotFound(message_id))
    }

    pub async fn enter(
        &self,
        message_id: u64,
        user_id: u64,
        weight: u32,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, GiveawayError> {
        if weight == 0 {
            return Err(GiveawayError::InvalidWeight(user_id));
        }

        let giveaway = self.get(message_id).await?;
        if !giveaway.is_open(now) {
            return Ok(EntryOutcome::Closed);
        }

        if !self.store.add_entry(message_id, user_id, weight).await? {
            return Ok(EntryOutcome::AlreadyEntered);
        }
        let total_entries = self.store.entry_count(message_id).await?;
        Ok(EntryOutcome::Entered { total_entries })
    }

    /// Everyone who entered, in id order.
    pub async fn entrant_ids(&self, message_id: u64) -> Result<Vec<u64>, GiveawayError> {
        Ok(self.store.entries(message_id).await?.into_keys().collect())
    }

    /// Active giveaways whose end time has passed.
    pub async fn due_giveaways(&self, now: DateTime<Utc>) -> Result<Vec<Giveaway>, GiveawayError> {
        Ok(self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|g| g.ends_at <= now)
            .collect())
    }

    /// End a giveaway and draw its winners among entrants for which
    /// `is_eligible` holds.
    ///
    /// `Ok(None)` when somebody else already ended it.
    pub async fn finish<R, F>(
        &self,
        message_id: u64,
        is_eligible: F,
        rng: &mut R,
    ) -> Result<Option<DrawResult>, GiveawayError>
    where
        R: Rng + Send,
        F: Fn(u64) -> bool + Send,
    {
        if !self.store.deactivate(message_id).await? {
            return Ok(None);
        }

        let mut giveaway = self.get(message_id).await?;
        let entrants = self.store.entries(message_id).await?;
        let entrant_count = entrants.len();
        let eligible: BTreeMap<u64, u32> = entrants
            .into_iter()
            .filter(|(user_id, _)| is_eligible(*user_id))
            .collect();

        // Nobody (left) to draw from: the giveaway just ends empty, even under Strict.
        let winners = if eligible.is_empty() {
            Vec::new()
        } else {
            draw_winners(&eligible, giveaway.winner_count as usize, self.policy, rng)?
        };

        self.store.set_winners(message_id, &winners).await?;
        giveaway.winners = winners.clone();

        Ok(Some(DrawResult {
            giveaway,
            winners,
            entrant_count,
            eligible_count: eligible.len(),
        }))
    }

    /// Draw `count` fresh winners for an ended giveaway, skipping anyone who
    /// already won it.
    pub async fn reroll<R, F>(
        &self,
        message_id: u64,
        count: u32,
        is_eligible: F,
        rng: &mut R,
    ) -> Result<DrawResult, GiveawayError>
    where
        R: Rng + Send,
        F: Fn(u64) -> bool + Send,
    {
        if count == 0 {
            return Err(GiveawayError::InvalidWinnerCount);
        }

        let mut giveaway = self.get(message_id).await?;
        if giveaway.active {
            return Err(GiveawayError::StillActive(message_id));
        }

        let all = self.store.entries(message_id).await?;
        let entrant_count = all.len();
        let remaining: BTreeMap<u64, u32> = all
            .into_iter()
            .filter(|(user_id, _)| !giveaway.winners.contains(user_id) && is_eligible(*user_id))
            .collect();

        let winners = draw_winners(&remaining, count as usize, self.policy, rng)?;

        giveaway.winners.extend(winners.iter().copied());
        self.store.set_winners(message_id, &giveaway.winners).await?;

        Ok(DrawResult {
            giveaway,
            winners,
            entrant_count,
            eligible_count: remaining.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestStore {
        giveaways: Mutex<HashMap<u64, Giveaway>>,
        pools: Mutex<HashMap<u64, BTreeMap<u64, u32>>>,
    }

    #[async_trait]
    impl GiveawayStore for TestStore {
        async fn create(&self, giveaway: &Giveaway) -> Result<(), GiveawayError> {
            self.giveaways
                .lock()
                .unwrap()
                .insert(giveaway.message_id, giveaway.clone());
            Ok(())
        }

        async fn get(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError> {
            Ok(self.giveaways.lock().unwrap().get(&message_id).cloned())
        }

        async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError> {
            Ok(self
                .giveaways
                .lock()
                .unwrap()
                .values()
                .filter(|g| g.active)
                .cloned()
                .collect())
        }

        async fn add_entry(&self, message_id: u64, user_id: u64, weight: u32) -> Result<bool, GiveawayError> {
            let mut pools = self.pools.lock().unwrap();
            let pool = pools.entry(message_id).or_default();
            if pool.contains_key(&user_id) {
                return Ok(false);
            }
            pool.insert(user_id, weight);
            Ok(true)
        }

        async fn entries(&self, message_id: u64) -> Result<BTreeMap<u64, u32>, GiveawayError> {
            Ok(self
                .pools
                .lock()
                .unwrap()
                .get(&message_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn entry_count(&self, message_id: u64) -> Result<u64, GiveawayError> {
            Ok(self.entries(message_id).await?.len() as u64)
        }

        async fn deactivate(&self, message_id: u64) -> Result<bool, GiveawayError> {
            let mut giveaways = self.giveaways.lock().unwrap();
            match giveaways.get_mut(&message_id) {
                Some(g) if g.active => {
                    g.active = false;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn set_winners(&self, message_id: u64, winners: &[u64]) -> Result<(), GiveawayError> {
            if let Some(g) = self.giveaways.lock().unwrap().get_mut(&message_id) {
                g.winners = winners.to_vec();
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn everyone(_: u64) -> bool {
        true
    }

    fn new_giveaway(winner_count: u32) -> NewGiveaway {
        NewGiveaway {
            message_id: 500,
            channel_id: 2,
            guild_id: 1,
            host_id: 9,
            prize: "Nitro".into(),
            duration: Duration::minutes(30),
            winner_count,
        }
    }

    #[tokio::test]
    async fn start_validates_input() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::AllowFewer);

        let mut zero_duration = new_giveaway(1);
        zero_duration.duration = Duration::zero();
        assert!(matches!(
            service.start(zero_duration, now()).await,
            Err(GiveawayError::InvalidDuration)
        ));
        assert!(matches!(
            service.start(new_giveaway(0), now()).await,
            Err(GiveawayError::InvalidWinnerCount)
        ));

        let started = service.start(new_giveaway(1), now()).await.unwrap();
        assert_eq!(started.ends_at, now() + Duration::minutes(30));
        assert!(started.active);
    }

    #[tokio::test]
    async fn entering_twice_and_after_close() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::AllowFewer);
        service.start(new_giveaway(1), now()).await.unwrap();

        assert_eq!(
            service.enter(500, 10, 1, now()).await.unwrap(),
            EntryOutcome::Entered { total_entries: 1 }
        );
        assert_eq!(
            service.enter(500, 10, 1, now()).await.unwrap(),
            EntryOutcome::AlreadyEntered
        );
        assert_eq!(
            service.enter(500, 11, 1, now() + Duration::minutes(30)).await.unwrap(),
            EntryOutcome::Closed
        );
        assert!(matches!(
            service.enter(404, 10, 1, now()).await,
            Err(GiveawayError::NotFound(404))
        ));
    }

    #[tokio::test]
    async fn finishing_is_one_shot() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::AllowFewer);
        service.start(new_giveaway(2), now()).await.unwrap();
        for user in [10, 11, 12] {
            service.enter(500, user, 1, now()).await.unwrap();
        }

        let later = now() + Duration::minutes(31);
        assert_eq!(service.due_giveaways(now()).await.unwrap().len(), 0);
        assert_eq!(service.due_giveaways(later).await.unwrap().len(), 1);

        let mut rng = StdRng::seed_from_u64(3);
        let result = service.finish(500, everyone, &mut rng).await.unwrap().unwrap();
        assert_eq!(result.winners.len(), 2);
        assert_eq!(result.entrant_count, 3);

        assert!(service.finish(500, everyone, &mut rng).await.unwrap().is_none());
        assert!(service.due_giveaways(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strict_policy_reports_shortfall() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::Strict);
        service.start(new_giveaway(3), now()).await.unwrap();
        service.enter(500, 10, 1, now()).await.unwrap();

        let result = service.finish(500, everyone, &mut StdRng::seed_from_u64(1)).await;
        assert!(matches!(
            result,
            Err(GiveawayError::InsufficientEntrants { requested: 3, available: 1 })
        ));
    }

    #[tokio::test]
    async fn reroll_skips_previous_winners() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::AllowFewer);
        service.start(new_giveaway(1), now()).await.unwrap();
        service.enter(500, 10, 1, now()).await.unwrap();
        service.enter(500, 11, 1, now()).await.unwrap();

        let mut rng = StdRng::seed_from_u64(8);
        assert!(matches!(
            service.reroll(500, 1, everyone, &mut rng).await,
            Err(GiveawayError::StillActive(500))
        ));

        let first = service.finish(500, everyone, &mut rng).await.unwrap().unwrap().winners[0];
        let rerolled = service.reroll(500, 1, everyone, &mut rng).await.unwrap();
        assert_eq!(rerolled.winners.len(), 1);
        assert_ne!(rerolled.winners[0], first);

        let exhausted = service.reroll(500, 1, everyone, &mut rng).await.unwrap();
        assert!(exhausted.winners.is_empty());
    }

    #[tokio::test]
    async fn departed_entrants_are_never_drawn() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::AllowFewer);
        service.start(new_giveaway(3), now()).await.unwrap();
        for user in [10, 11, 12, 13] {
            service.enter(500, user, 5, now()).await.unwrap();
        }
        assert_eq!(service.entrant_ids(500).await.unwrap(), vec![10, 11, 12, 13]);

        let still_here = |user_id: u64| user_id != 11 && user_id != 13;
        let mut rng = StdRng::seed_from_u64(21);
        let result = service.finish(500, still_here, &mut rng).await.unwrap().unwrap();

        assert_eq!(result.entrant_count, 4);
        assert_eq!(result.eligible_count, 2);
        let mut winners = result.winners.clone();
        winners.sort_unstable();
        assert_eq!(winners, vec![10, 12]);

        let rerolled = service.reroll(500, 1, still_here, &mut rng).await.unwrap();
        assert!(rerolled.winners.is_empty());
    }

    #[tokio::test]
    async fn everyone_gone_ends_empty_even_when_strict() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::Strict);
        service.start(new_giveaway(1), now()).await.unwrap();
        service.enter(500, 10, 1, now()).await.unwrap();

        let result = service
            .finish(500, |_| false, &mut StdRng::seed_from_u64(4))
            .await
            .unwrap()
            .unwrap();
        assert!(result.winners.is_empty());
        assert_eq!(result.entrant_count, 1);
        assert_eq!(result.eligible_count, 0);
    }

    #[tokio::test]
    async fn strict_with_no_entries_ends_empty() {
        let service = GiveawayService::new(TestStore::default(), ShortfallPolicy::Strict);
        service.start(new_giveaway(2), now()).await.unwrap();

        let result = service
            .finish(500, everyone, &mut StdRng::seed_from_u64(5))
            .await
            .unwrap()
            .unwrap();
        assert!(result.winners.is_empty());
        assert_eq!(result.entrant_count, 0);
    }
}
