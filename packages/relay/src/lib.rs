// Encounter Relay - Core
//
// Polls a map endpoint for time-limited encounters, drops the ones already
// seen and relays the rest to a Telegram chat.
//
// Infrastructure sits behind the Base* traits in kernel/; the engine and its
// loops live in scraper/.

pub mod commands;
pub mod config;
pub mod error;
pub mod kernel;
pub mod scraper;

pub use config::*;
