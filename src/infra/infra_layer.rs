// The infra module contains implementations of core traits.
// Every SQLite store shares the pool opened by `database::connect`.

#[path = "database.rs"]
pub mod database;

#[path = "leveling/leveling_store.rs"]
pub mod leveling;

#[path = "settings/sqlite_settings_store.rs"]
pub mod settings;

#[path = "scheduling/sqlite_schedule_store.rs"]
pub mod scheduling;

#[path = "giveaway/sqlite_giveaway_store.rs"]
pub mod giveaway;
