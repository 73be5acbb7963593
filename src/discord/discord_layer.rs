// Discord layer - commands, gateway event handlers and background tasks.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "leveling/leveling_announcements.rs"]
pub mod leveling_announcements;

#[path = "giveaway/giveaway_messages.rs"]
pub mod giveaway_messages;

#[path = "events/member_events.rs"]
pub mod member_events;

#[path = "channel_purge.rs"]
pub mod channel_purge;

#[path = "tasks/schedule_runner.rs"]
pub mod schedule_runner;

#[path = "tasks/giveaway_watcher.rs"]
pub mod giveaway_watcher;

#[path = "tasks/daily_award.rs"]
pub mod daily_award;

// Re-export command types for convenience
pub use commands::leveling::{Context, Data, Error};

/// Every slash command the bot registers.
pub fn all_commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        commands::leveling::rank(),
        commands::leveling::leaderboard(),
        commands::settings::config_channels(),
        commands::settings::config_leveling(),
        commands::giveaway::giveaway(),
        commands::scheduling::schedule(),
        commands::help::help(),
        commands::utility::bugreport(),
    ]
}
