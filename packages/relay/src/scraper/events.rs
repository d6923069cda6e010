//! Typed event bus the engine reports through.
//!
//! # Guarantees
//!
//! - **Fire-and-forget**: emitting never blocks and succeeds with no subscribers
//! - **At-most-once delivery**: slow receivers get `RecvError::Lagged` and miss events
//! - **No replay**: events emitted before `subscribe()` are not received

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::filters::FilterParameters;

/// Default channel capacity for the event bus.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called
    Requested,
    /// The poll loop hit an error it cannot recover from
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScraperEvent {
    Started {
        filters: FilterParameters,
    },
    Stopped {
        reason: StopReason,
    },
    SessionEstablished {
        expires_at: DateTime<Utc>,
    },
    SessionFailed {
        error: String,
    },
    EncounterDelivered {
        encounter_id: String,
    },
    DeliveryFailed {
        encounter_id: String,
        error: String,
    },
    /// Transient; the next poll runs as scheduled
    PollFailed {
        error: String,
    },
    /// The engine stopped itself
    Fatal {
        error: String,
    },
    FiltersUpdated {
        filters: FilterParameters,
    },
}

/// Operator-facing alert for events that warrant one.
pub fn alert_text(event: &ScraperEvent) -> Option<String> {
    match event {
        ScraperEvent::SessionEstablished { .. } => Some("💪🏻 Scraper loaded 💪🏻".to_string()),
        ScraperEvent::SessionFailed { error } => Some(format!("❌ {error} ❌")),
        ScraperEvent::Fatal { error } => Some(format!("❌ Scraper stopped: {error} ❌")),
        _ => None,
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ScraperEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn emit(&self, event: ScraperEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScraperEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
