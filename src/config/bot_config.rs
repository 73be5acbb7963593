// Bot configuration.
//
// Two sources:
//   - environment variables (after dotenv has loaded .env) for secrets, ids
//     and paths
//   - an optional JSON file for the structured tables: level role rewards,
//     giveaway role weights, role alerts and seed ping schedules
//
// Parsing goes through a lookup closure so tests never touch the real process
// environment.

use crate::core::leveling::RoleRewards;
use crate::core::scheduling::PingSchedule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/bot.db";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_GIVEAWAY_CHECK_SECS: u64 = 30;
const DEFAULT_WELCOME_MESSAGES_PATH: &str = "data/welcome_messages.json";
const DEFAULT_BOT_CONFIG_PATH: &str = "bot_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    MissingVar(String),

    #[error("Environment variable {name} has an invalid value: {value:?}")]
    InvalidVar { name: String, value: String },

    #[error("BOT_ENV must be 'dev' or 'prod', got {0:?}")]
    InvalidEnvironment(String),

    #[error("Could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file {path} is invalid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which token/guild pair to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    fn prefix(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Prod => "PROD",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub environment: Environment,
    pub token: String,
    /// Guild commands are registered in, and the guild background tasks act on.
    pub guild_id: Option<u64>,
    pub database_url: String,
    pub log_level: String,
    pub default_welcome_channel_id: Option<u64>,
    pub default_levelup_channel_id: Option<u64>,
    pub bug_report_channel_id: Option<u64>,
    pub daily_xp_role_id: Option<u64>,
    pub daily_announce_channel_id: Option<u64>,
    /// Channels that never earn XP and are never purged.
    pub excluded_channel_ids: Vec<u64>,
    pub giveaway_check_interval: Duration,
    pub welcome_messages_path: PathBuf,
    pub bot_config_path: PathBuf,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = match get("BOT_ENV") {
            Some(value) => value.parse()?,
            None => Environment::Dev,
        };

        let token_var = format!("{}_DISCORD_TOKEN", environment.prefix());
        let token = get(&token_var).ok_or(ConfigError::MissingVar(token_var))?;

        let guild_var = format!("{}_GUILD_ID", environment.prefix());
        let guild_id = parse_opt(&guild_var, get(&guild_var))?;

        let excluded_channel_ids = match get("EXCLUDED_CHANNEL_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value::<u64>("EXCLUDED_CHANNEL_IDS", s))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let giveaway_secs = parse_opt::<u64>(
            "GIVEAWAY_CHECK_INTERVAL_SECS",
            get("GIVEAWAY_CHECK_INTERVAL_SECS"),
        )?
        .unwrap_or(DEFAULT_GIVEAWAY_CHECK_SECS)
        .max(1);

        Ok(Self {
            environment,
            token,
            guild_id,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            default_welcome_channel_id: parse_opt(
                "DEFAULT_WELCOME_CHANNEL_ID",
                get("DEFAULT_WELCOME_CHANNEL_ID"),
            )?,
            default_levelup_channel_id: parse_opt(
                "DEFAULT_LEVELUP_CHANNEL_ID",
                get("DEFAULT_LEVELUP_CHANNEL_ID"),
            )?,
            bug_report_channel_id: parse_opt("BUG_REPORT_CHANNEL_ID", get("BUG_REPORT_CHANNEL_ID"))?,
            daily_xp_role_id: parse_opt("DAILY_XP_ROLE_ID", get("DAILY_XP_ROLE_ID"))?,
            daily_announce_channel_id: parse_opt(
                "DAILY_ANNOUNCE_CHANNEL_ID",
                get("DAILY_ANNOUNCE_CHANNEL_ID"),
            )?,
            excluded_channel_ids,
            giveaway_check_interval: Duration::from_secs(giveaway_secs),
            welcome_messages_path: get("WELCOME_MESSAGES_PATH")
                .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGES_PATH.to_string())
                .into(),
            bot_config_path: get("BOT_CONFIG_PATH")
                .unwrap_or_else(|| DEFAULT_BOT_CONFIG_PATH.to_string())
                .into(),
        })
    }

    pub fn is_excluded(&self, channel_id: u64) -> bool {
        self.excluded_channel_ids.contains(&channel_id)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_opt<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|raw| parse_value(name, &raw)).transpose()
}

// ============================================================================
// FEATURE TABLES (JSON)
// ============================================================================

/// Posted in `channel_id` when a member gains `role_id`. `{member}` becomes
/// the member mention.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RoleAlert {
    pub role_id: u64,
    pub channel_id: u64,
    pub message: String,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Level -> role granted on reaching it.
    pub role_rewards: RoleRewards,
    /// Role -> giveaway entry weight.
    pub role_weights: HashMap<u64, u32>,
    #[serde(default = "default_weight")]
    pub default_weight: u32,
    /// Fail a giveaway draw instead of drawing fewer winners.
    pub strict_giveaway_draws: bool,
    pub role_alerts: Vec<RoleAlert>,
    /// Guild -> channel new members are pointed at to pick roles.
    pub role_channels: HashMap<u64, u64>,
    /// Inserted into the schedule table on first start.
    pub ping_schedules: Vec<PingSchedule>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            role_rewards: RoleRewards::new(),
            role_weights: HashMap::new(),
            default_weight: default_weight(),
            strict_giveaway_draws: false,
            role_alerts: Vec::new(),
            role_channels: HashMap::new(),
            ping_schedules: Vec::new(),
        }
    }
}

impl FeatureConfig {
    /// Read the JSON file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Bot config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn dev_is_the_default_environment() {
        let config = BotConfig::from_lookup(lookup(&[
            ("DEV_DISCORD_TOKEN", "dev-token"),
            ("PROD_DISCORD_TOKEN", "prod-token"),
            ("DEV_GUILD_ID", "123"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.token, "dev-token");
        assert_eq!(config.guild_id, Some(123));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.giveaway_check_interval, Duration::from_secs(30));
    }

    #[test]
    fn prod_reads_prod_variables() {
        let config = BotConfig::from_lookup(lookup(&[
            ("BOT_ENV", "prod"),
            ("PROD_DISCORD_TOKEN", "prod-token"),
            ("PROD_GUILD_ID", "456"),
            ("EXCLUDED_CHANNEL_IDS", "1, 2,3"),
            ("GIVEAWAY_CHECK_INTERVAL_SECS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.token, "prod-token");
        assert_eq!(config.guild_id, Some(456));
        assert_eq!(config.excluded_channel_ids, vec![1, 2, 3]);
        assert!(config.is_excluded(2));
        assert_eq!(config.giveaway_check_interval, Duration::from_secs(10));
    }

    #[test]
    fn missing_token_and_bad_values_are_errors() {
        assert!(matches!(
            BotConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingVar(name)) if name == "DEV_DISCORD_TOKEN"
        ));
        assert!(matches!(
            BotConfig::from_lookup(lookup(&[("BOT_ENV", "staging")])),
            Err(ConfigError::InvalidEnvironment(_))
        ));
        assert!(matches!(
            BotConfig::from_lookup(lookup(&[
                ("DEV_DISCORD_TOKEN", "t"),
                ("DAILY_XP_ROLE_ID", "not-a-number"),
            ])),
            Err(ConfigError::InvalidVar { .. })
        ));
    }

    #[test]
    fn feature_file_parses_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "role_rewards": {{"1": 11, "10": 22}},
                "role_weights": {{"500": 3}},
                "role_alerts": [{{"role_id": 7, "channel_id": 8, "message": "{{member}} ranked up"}}],
                "ping_schedules": [{{"role_id": 5, "channel_id": 6, "hour": 14, "minute": 0,
                                     "days": [0, 2, 4], "message": "Raid"}}]
            }}"#
        )
        .unwrap();

        let features = FeatureConfig::load(file.path()).unwrap();
        assert_eq!(features.role_rewards.get(&10), Some(&22));
        assert_eq!(features.role_weights.get(&500), Some(&3));
        assert_eq!(features.default_weight, 1);
        assert_eq!(features.role_alerts[0].message, "{member} ranked up");
        assert_eq!(features.ping_schedules.len(), 1);
        assert!(!features.strict_giveaway_draws);
    }

    #[test]
    fn missing_feature_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let features = FeatureConfig::load(&dir.path().join("nope.json")).unwrap();
        assert!(features.role_rewards.is_empty());
        assert_eq!(features.default_weight, 1);
    }
}
