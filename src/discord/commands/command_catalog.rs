// Discord commands module.
// Each feature gets its own command file.

pub mod leveling;

pub mod settings;

pub mod giveaway;

pub mod scheduling;

pub mod help;

// Bug reports
pub mod utility;
