// Per-guild configuration: which channels get welcome and level-up messages,
// and how fast members earn XP.
//
// Reads are served from a DashMap cache that is filled once at startup and
// written through on every change, so the message handler never waits on the
// database just to learn the cooldown.

use crate::core::leveling::{LevelingSettings, XpRange};
use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// Stored overrides for one guild. `None` means "use the bot default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub welcome_channel_id: Option<u64>,
    pub levelup_channel_id: Option<u64>,
    pub xp_cooldown_secs: Option<u64>,
    pub xp_min: Option<u64>,
    pub xp_max: Option<u64>,
}

impl GuildSettings {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }
}

/// Values used when a guild has not overridden a setting.
#[derive(Debug, Clone, Default)]
pub struct SettingsDefaults {
    pub welcome_channel_id: Option<u64>,
    pub levelup_channel_id: Option<u64>,
    pub leveling: LevelingSettings,
}

/// Longest XP cooldown an admin can set: one year.
pub const MAX_COOLDOWN_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Cooldown must be between 0 and 31536000 seconds (one year), got {0}")]
    InvalidCooldown(i64),

    #[error("Invalid XP range: min must be at least 0 and max must be greater than min (got {min}..={max})")]
    InvalidXpRange { min: i64, max: i64 },

    #[error("Storage error: {0}")]
    StorageError(String),
}

#[async_trait]
pub trait GuildSettingsStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<GuildSettings>, SettingsError>;
    async fn save(&self, settings: &GuildSettings) -> Result<(), SettingsError>;
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct SettingsService<S: GuildSettingsStore> {
    store: S,
    defaults: SettingsDefaults,
    cache: DashMap<u64, GuildSettings>,
}

impl<S: GuildSettingsStore> SettingsService<S> {
    pub fn new(store: S, defaults: SettingsDefaults) -> Self {
        Self {
            store,
            defaults,
            cache: DashMap::new(),
        }
    }

    /// Fill the cache from storage. Returns how many guilds were loaded.
    pub async fn load(&self) -> Result<usize, SettingsError> {
        let all = self.store.load_all().await?;
        let count = all.len();
        for settings in all {
            self.cache.insert(settings.guild_id, settings);
        }
        Ok(count)
    }

    pub fn get(&self, guild_id: u64) -> GuildSettings {
        self.cache
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| GuildSettings::new(guild_id))
    }

    pub fn welcome_channel(&self, guild_id: u64) -> Option<u64> {
        self.get(guild_id)
            .welcome_channel_id
            .or(self.defaults.welcome_channel_id)
    }

    pub fn levelup_channel(&self, guild_id: u64) -> Option<u64> {
        self.get(guild_id)
            .levelup_channel_id
            .or(self.defaults.levelup_channel_id)
    }

    /// Effective cooldown and XP range for a guild.
    pub fn leveling(&self, guild_id: u64) -> LevelingSettings {
        let stored = self.get(guild_id);
        let fallback = self.defaults.leveling;

        let cooldown = stored
            .xp_cooldown_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .filter(|secs| *secs <= MAX_COOLDOWN_SECS)
            .and_then(Duration::try_seconds)
            .unwrap_or(fallback.cooldown);

        let xp_range = match (stored.xp_min, stored.xp_max) {
            (Some(min), Some(max)) => XpRange::new(min, max).unwrap_or(fallback.xp_range),
            _ => fallback.xp_range,
        };

        LevelingSettings { cooldown, xp_range }
    }

    async fn update<F>(&self, guild_id: u64, apply: F) -> Result<GuildSettings, SettingsError>
    where
        F: FnOnce(&mut GuildSettings),
    {
        let mut settings = self.get(guild_id);
        apply(&mut settings);
        self.store.save(&settings).await?;
        self.cache.insert(guild_id, settings.clone());
        Ok(settings)
    }

    pub async fn set_welcome_channel(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<GuildSettings, SettingsError> {
        self.update(guild_id, |s| s.welcome_channel_id = Some(channel_id))
            .await
    }

    pub async fn set_levelup_channel(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<GuildSettings, SettingsError> {
        self.update(guild_id, |s| s.levelup_channel_id = Some(channel_id))
            .await
    }

    pub async fn set_cooldown(
        &self,
        guild_id: u64,
        seconds: i64,
    ) -> Result<GuildSettings, SettingsError> {
        if !(0..=MAX_COOLDOWN_SECS).contains(&seconds) {
            return Err(SettingsError::InvalidCooldown(seconds));
        }
        let seconds = seconds as u64;
        self.update(guild_id, |s| s.xp_cooldown_secs = Some(seconds))
            .await
    }

    pub async fn set_xp_range(
        &self,
        guild_id: u64,
        min: i64,
        max: i64,
    ) -> Result<GuildSettings, SettingsError> {
        if min < 0 || max <= min {
            return Err(SettingsError::InvalidXpRange { min, max });
        }
        let (min, max) = (min as u64, max as u64);
        self.update(guild_id, |s| {
            s.xp_min = Some(min);
            s.xp_max = Some(max);
        })
        .await
    }
}
