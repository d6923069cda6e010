// Test dependencies - mock implementations for testing
//
// Provides fakes for every kernel trait so an engine can run end to end
// without touching the network, the chat or the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{BaseClock, BaseDelivery, BaseTransport, HttpResponse, RelayDeps};
use crate::error::{DeliveryError, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Landing page markup carrying `token` the way the target embeds it.
pub fn landing_page(token: &str) -> String {
    format!(
        "<html><head><script>var map;\nvar token = '{}';\nvar centerLat = 52.6;</script></head></html>",
        token
    )
}

/// Poll response body with the given records under the expected key.
pub fn poll_body(records: &[serde_json::Value]) -> String {
    serde_json::json!({ "pokemons": records }).to_string()
}

/// One encounter as the endpoint serializes it.
pub fn encounter_json(id: &str, name: &str, disappear_time: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "encounter_id": id,
        "pokemon_name": name,
        "individual_attack": 15,
        "individual_defense": 14,
        "individual_stamina": 15,
        "cp": 2271,
        "level": 30,
        "is_verified_despawn": true,
        "disappear_time": disappear_time.timestamp_millis(),
        "latitude": 52.6381,
        "longitude": 13.2054,
    })
}

// =============================================================================
// Mock Transport
// =============================================================================

/// Arguments captured from a form POST
#[derive(Debug, Clone)]
pub struct PostCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl PostCall {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type Queued = VecDeque<Result<HttpResponse, TransportError>>;

/// Transport with queued responses. Once a queue runs dry the matching
/// fallback is returned on every call.
pub struct MockTransport {
    landing: Mutex<Queued>,
    landing_fallback: Mutex<HttpResponse>,
    polls: Mutex<Queued>,
    poll_fallback: Mutex<HttpResponse>,
    get_calls: Mutex<Vec<String>>,
    post_calls: Mutex<Vec<PostCall>>,
    cookie_clears: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            landing: Mutex::new(VecDeque::new()),
            landing_fallback: Mutex::new(HttpResponse::new(200, "<html></html>")),
            polls: Mutex::new(VecDeque::new()),
            poll_fallback: Mutex::new(HttpResponse::new(200, poll_body(&[]))),
            get_calls: Mutex::new(Vec::new()),
            post_calls: Mutex::new(Vec::new()),
            cookie_clears: AtomicUsize::new(0),
        }
    }

    /// Queue a landing page embedding `token`
    pub fn with_token(self, token: &str) -> Self {
        self.push_landing(HttpResponse::new(200, landing_page(token)));
        self
    }

    pub fn with_poll_response(self, status: u16, body: impl Into<String>) -> Self {
        self.push_poll(HttpResponse::new(status, body));
        self
    }

    pub fn with_poll_fallback(self, status: u16, body: impl Into<String>) -> Self {
        *lock(&self.poll_fallback) = HttpResponse::new(status, body);
        self
    }

    pub fn push_landing(&self, response: HttpResponse) {
        lock(&self.landing).push_back(Ok(response));
    }

    pub fn push_landing_error(&self, error: TransportError) {
        lock(&self.landing).push_back(Err(error));
    }

    pub fn push_poll(&self, response: HttpResponse) {
        lock(&self.polls).push_back(Ok(response));
    }

    pub fn push_poll_error(&self, error: TransportError) {
        lock(&self.polls).push_back(Err(error));
    }

    /// Get all URLs fetched with GET
    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.get_calls).clone()
    }

    /// Get all POSTs with their headers and form fields
    pub fn post_calls(&self) -> Vec<PostCall> {
        lock(&self.post_calls).clone()
    }

    pub fn post_count(&self) -> usize {
        lock(&self.post_calls).len()
    }

    pub fn cookie_clears(&self) -> usize {
        self.cookie_clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseTransport for MockTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        lock(&self.get_calls).push(url.to_string());

        match lock(&self.landing).pop_front() {
            Some(queued) => queued,
            None => Ok(lock(&self.landing_fallback).clone()),
        }
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        lock(&self.post_calls).push(PostCall {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            form: form.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        });

        match lock(&self.polls).pop_front() {
            Some(queued) => queued,
            None => Ok(lock(&self.poll_fallback).clone()),
        }
    }

    fn clear_cookies(&self) {
        self.cookie_clears.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Mock Delivery
// =============================================================================

/// A delivery attempt, recorded whether or not it succeeded
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        destination: String,
        message: String,
    },
    Location {
        destination: String,
        latitude: f64,
        longitude: f64,
    },
}

#[derive(Default)]
pub struct MockDelivery {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl MockDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent send fails with a network error
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|s| match s {
                Sent::Text { message, .. } => Some(message.clone()),
                Sent::Location { .. } => None,
            })
            .collect()
    }

    pub fn locations(&self) -> Vec<(f64, f64)> {
        lock(&self.sent)
            .iter()
            .filter_map(|s| match s {
                Sent::Location {
                    latitude,
                    longitude,
                    ..
                } => Some((*latitude, *longitude)),
                Sent::Text { .. } => None,
            })
            .collect()
    }

    fn outcome(&self) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DeliveryError::Network("connection reset by peer".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BaseDelivery for MockDelivery {
    async fn send_text(&self, destination: &str, message: &str) -> Result<(), DeliveryError> {
        lock(&self.sent).push(Sent::Text {
            destination: destination.to_string(),
            message: message.to_string(),
        });
        self.outcome()
    }

    async fn send_location(
        &self,
        destination: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DeliveryError> {
        lock(&self.sent).push(Sent::Location {
            destination: destination.to_string(),
            latitude,
            longitude,
        });
        self.outcome()
    }
}

// =============================================================================
// Fake Clock
// =============================================================================

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl BaseClock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Handles to the fakes behind a [`RelayDeps`], kept so tests can script and inspect them
pub struct TestDependencies {
    pub transport: Arc<MockTransport>,
    pub delivery: Arc<MockDelivery>,
    pub clock: Arc<FakeClock>,
}

impl TestDependencies {
    pub fn new(transport: MockTransport, delivery: MockDelivery, now: DateTime<Utc>) -> Self {
        Self {
            transport: Arc::new(transport),
            delivery: Arc::new(delivery),
            clock: Arc::new(FakeClock::new(now)),
        }
    }

    pub fn relay_deps(&self) -> RelayDeps {
        RelayDeps::new(
            self.transport.clone(),
            self.delivery.clone(),
            self.clock.clone(),
        )
    }
}
