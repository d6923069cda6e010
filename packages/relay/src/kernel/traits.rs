// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no scraping logic.
// The engine reaches the network, the chat and the wall clock through them,
// and tests swap in the fakes from test_dependencies.
//
// Naming convention: Base* for trait names (e.g., BaseTransport, BaseDelivery)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{DeliveryError, TransportError};

// =============================================================================
// HTTP Transport Trait (Infrastructure - session-bound HTTP)
// =============================================================================

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait BaseTransport: Send + Sync {
    /// Plain GET sharing the session cookies
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Form-encoded POST sharing the session cookies
    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// Drop every cookie collected so far
    fn clear_cookies(&self);
}

// =============================================================================
// Delivery Trait (Infrastructure - messaging channel)
// =============================================================================

#[async_trait]
pub trait BaseDelivery: Send + Sync {
    /// Send an HTML-formatted text message
    async fn send_text(&self, destination: &str, message: &str) -> Result<(), DeliveryError>;

    /// Send a map pin
    async fn send_location(
        &self,
        destination: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DeliveryError>;
}

// =============================================================================
// Clock Trait
// =============================================================================

pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
