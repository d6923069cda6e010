//! Poll, dedupe, format and deliver.

pub mod dedup;
pub mod engine;
pub mod events;
pub mod fetcher;
pub mod filters;
pub mod models;
pub mod notifier;
pub mod session;

pub use dedup::DedupStore;
pub use engine::{Engine, EngineConfig, EngineState};
pub use events::{alert_text, EventBus, ScraperEvent, StopReason};
pub use fetcher::Fetcher;
pub use filters::{BoundingBox, FilterParameters};
pub use models::EncounterRecord;
pub use notifier::Notifier;
pub use session::SessionManager;
