//! Lifecycle controller: owns the poll loop and the sweep loop.
//!
//! `start()` spawns both loops; `stop()` does not return until both have
//! exited and the dedup store has been cleared, so nothing touches shared
//! state after it returns. The poll loop stops itself on a fatal fetch
//! error and reports it on the event bus.

use chrono_tz::Tz;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::DedupStore;
use super::events::{EventBus, ScraperEvent, StopReason};
use super::fetcher::Fetcher;
use super::filters::FilterParameters;
use super::notifier::Notifier;
use super::session::{SessionManager, SessionState};
use crate::error::{FetchError, FilterError};
use crate::kernel::{BaseClock, RelayDeps};

pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Site root; the landing page lives at `{base_url}/`
    pub base_url: String,
    /// Poll endpoint path, relative to `base_url`
    pub api_endpoint: String,
    pub poll_delay: Duration,
    pub sweep_interval: Duration,
    /// Zone for token expiry and rendered despawn times
    pub timezone: Tz,
    /// Chat the notifications go to
    pub destination: String,
}

impl EngineConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_endpoint: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_endpoint: api_endpoint.into(),
            poll_delay: DEFAULT_POLL_DELAY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            timezone: DEFAULT_TIMEZONE,
            destination: destination.into(),
        }
    }

    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    session: Arc<SessionManager>,
    fetcher: Fetcher,
    store: DedupStore,
    notifier: Notifier,
    clock: Arc<dyn BaseClock>,
    bus: EventBus,
    running: AtomicBool,
    loops: AtomicUsize,
}

/// Handles of the current run, guarded so start and stop never interleave.
#[derive(Default)]
struct Lifecycle {
    poll: Option<JoinHandle<()>>,
    /// Cancelled on stop to cut the poll delay short
    wake: Option<CancellationToken>,
}

/// Counts a background loop as alive for as long as it is held.
struct LoopGuard(Arc<EngineInner>);

impl LoopGuard {
    fn enter(inner: &Arc<EngineInner>) -> Self {
        inner.loops.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.loops.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Engine {
    inner: Arc<EngineInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: RelayDeps) -> Self {
        let session = Arc::new(SessionManager::new(
            deps.transport.clone(),
            &config.base_url,
            config.timezone,
        ));
        let fetcher = Fetcher::new(
            deps.transport.clone(),
            session.clone(),
            deps.clock.clone(),
            &config.base_url,
            &config.api_endpoint,
        );
        let notifier = Notifier::new(
            deps.delivery.clone(),
            config.destination.clone(),
            config.timezone,
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                session,
                fetcher,
                store: DedupStore::new(),
                notifier,
                clock: deps.clock,
                bus: EventBus::new(),
                running: AtomicBool::new(false),
                loops: AtomicUsize::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Launch the sweep and poll loops, optionally replacing the filters first.
    ///
    /// Returns `false` without doing anything if the engine is already running.
    pub async fn start(&self, filters: Option<FilterParameters>) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;

        if self.is_running() {
            info!("Scraper already running");
            return false;
        }

        // A run that ended on a fatal error may still be finishing up
        if let Some(previous) = lifecycle.poll.take() {
            reap(previous, "poll").await;
        }

        if let Some(filters) = filters {
            self.inner.fetcher.set_filters(filters);
        }

        let wake = CancellationToken::new();
        let sweep_stop = CancellationToken::new();
        let sweep = tokio::spawn(sweep_loop(
            self.inner.clone(),
            sweep_stop.clone(),
            LoopGuard::enter(&self.inner),
        ));

        self.inner.running.store(true, Ordering::SeqCst);

        let filters = self.inner.fetcher.filters();
        info!(filters = %filters, "Scraper started");
        self.inner.bus.emit(ScraperEvent::Started { filters });

        lifecycle.poll = Some(tokio::spawn(poll_task(
            self.inner.clone(),
            wake.clone(),
            sweep,
            sweep_stop,
            LoopGuard::enter(&self.inner),
        )));
        lifecycle.wake = Some(wake);

        true
    }

    /// Stop both loops and forget every remembered encounter.
    ///
    /// Blocks until the loops have exited. An in-flight poll request is
    /// allowed to finish. Returns `false` if the engine was not running.
    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;

        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        if !was_running {
            info!("Scraper already stopped");
        }

        if let Some(wake) = lifecycle.wake.take() {
            wake.cancel();
        }
        if let Some(poll) = lifecycle.poll.take() {
            reap(poll, "poll").await;
        }

        if was_running {
            info!("Scraper stopped");
            self.inner.bus.emit(ScraperEvent::Stopped {
                reason: StopReason::Requested,
            });
        }

        was_running
    }

    /// Parse `update` on top of the current filters and apply the result.
    ///
    /// On error the current filters are left untouched.
    pub fn update_filters(&self, update: &str) -> Result<FilterParameters, FilterError> {
        let filters = self.inner.fetcher.filters().apply_update(update)?;
        self.set_filters(filters.clone());
        Ok(filters)
    }

    /// Replace the filters; the next poll cycle uses them.
    pub fn set_filters(&self, filters: FilterParameters) {
        info!(filters = %filters, "Filters updated");
        self.inner.fetcher.set_filters(filters.clone());
        self.inner.bus.emit(ScraperEvent::FiltersUpdated { filters });
    }

    pub fn current_filters(&self) -> FilterParameters {
        self.inner.fetcher.filters()
    }

    pub fn get_current_filters(&self) -> String {
        self.current_filters().to_string()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EngineState {
        if self.is_running() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub fn get_pokes_db_size(&self) -> usize {
        self.inner.store.size()
    }

    pub fn session(&self) -> SessionState {
        self.inner.session.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScraperEvent> {
        self.inner.bus.subscribe()
    }

    /// Number of background loops currently alive.
    pub fn active_loops(&self) -> usize {
        self.inner.loops.load(Ordering::SeqCst)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(wake) = self.lifecycle.get_mut().wake.take() {
            wake.cancel();
        }
    }
}

async fn reap(handle: JoinHandle<()>, name: &str) {
    if let Err(e) = handle.await {
        error!(task = name, error = %e, "Background loop panicked");
    }
}

/// Poll loop plus its epilogue: stop the sweep loop, then clear the store.
async fn poll_task(
    inner: Arc<EngineInner>,
    wake: CancellationToken,
    sweep: JoinHandle<()>,
    sweep_stop: CancellationToken,
    _guard: LoopGuard,
) {
    if inner.session.token().is_none() {
        inner.establish_session().await;
    }

    let fatal = inner.poll_loop(&wake).await;

    sweep_stop.cancel();
    reap(sweep, "sweep").await;
    inner.store.clear();
    debug!("Dedup store cleared");

    if let Some(error) = fatal {
        inner.bus.emit(ScraperEvent::Fatal {
            error: error.to_string(),
        });
        inner.bus.emit(ScraperEvent::Stopped {
            reason: StopReason::Fatal,
        });
    }
}

async fn sweep_loop(inner: Arc<EngineInner>, stop: CancellationToken, _guard: LoopGuard) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(inner.config.sweep_interval) => {
                let removed = inner.store.sweep(inner.clock.now());
                debug!(removed, remaining = inner.store.size(), "Swept expired encounters");
            }
        }
    }
}

impl EngineInner {
    async fn establish_session(&self) {
        match self.session.handshake(self.clock.now()).await {
            Ok(expires_at) => {
                self.bus.emit(ScraperEvent::SessionEstablished { expires_at });
            }
            Err(e) => {
                error!(error = %e, "Initial handshake failed, polling without token");
                self.bus.emit(ScraperEvent::SessionFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Runs until stopped or a fatal error. Returns the fatal error if this
    /// loop is the one that stopped the engine.
    async fn poll_loop(&self, wake: &CancellationToken) -> Option<FetchError> {
        while self.running.load(Ordering::SeqCst) {
            if let Err(error) = self.poll_cycle().await {
                if self.running.swap(false, Ordering::SeqCst) {
                    return Some(error);
                }
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_delay) => {}
                _ = wake.cancelled() => {}
            }
        }
        None
    }

    /// One fetch and the notifications it produces.
    ///
    /// Returns the number of delivered encounters, or the error that must stop the engine.
    async fn poll_cycle(&self) -> Result<usize, FetchError> {
        let filters = self.fetcher.filters();

        let records = match self.fetcher.poll(&filters).await {
            Ok(records) => records,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Stopping scraper");
                return Err(e);
            }
            Err(FetchError::AuthRefreshed) => {
                info!("Session refreshed after rejected poll");
                if let Some(expires_at) = self.session.snapshot().expires_at {
                    self.bus.emit(ScraperEvent::SessionEstablished { expires_at });
                }
                return Ok(0);
            }
            Err(e) => {
                warn!(error = %e, "Poll failed");
                self.bus.emit(ScraperEvent::PollFailed {
                    error: e.to_string(),
                });
                return Ok(0);
            }
        };

        let now = self.clock.now();
        let mut delivered = 0;

        for record in &records {
            if self.store.is_known(&record.id) {
                continue;
            }

            match self.notifier.notify(record, now, &self.store).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(encounter_id = %record.id, name = %record.name, "Encounter delivered");
                    self.bus.emit(ScraperEvent::EncounterDelivered {
                        encounter_id: record.id.clone(),
                    });
                }
                Err(e) => {
                    error!(encounter_id = %record.id, error = %e, "Sending failed");
                    self.bus.emit(ScraperEvent::DeliveryFailed {
                        encounter_id: record.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(delivered)
    }
}
