// The core module contains all business logic.
// Each feature gets its own submodule. Nothing in here knows about Discord.

#[path = "leveling/leveling_service.rs"]
pub mod leveling;

#[path = "settings/settings_service.rs"]
pub mod settings;

#[path = "scheduling/schedule_service.rs"]
pub mod scheduling;

#[path = "giveaway/giveaway_service.rs"]
pub mod giveaway;

#[path = "welcome/welcome_templates.rs"]
pub mod welcome;
