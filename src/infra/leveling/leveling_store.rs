// Implementations of the leveling XpStore.

#[path = "sqlite_store.rs"]
pub mod sqlite_store;

pub use sqlite_store::SqliteXpStore;
