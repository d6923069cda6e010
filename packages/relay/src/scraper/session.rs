//! Session against the scraped site: cookies live in the transport, the
//! short-lived token and its expiry live here.

use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

use crate::error::AuthError;
use crate::kernel::BaseTransport;

lazy_static! {
    static ref TOKEN_PATTERN: Regex =
        Regex::new(r"var token = '(\S{42,48})';").expect("token pattern is valid");
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct SessionManager {
    transport: Arc<dyn BaseTransport>,
    landing_url: String,
    timezone: Tz,
    state: RwLock<SessionState>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn BaseTransport>, base_url: &str, timezone: Tz) -> Self {
        Self {
            transport,
            landing_url: format!("{}/", base_url.trim_end_matches('/')),
            timezone,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Fetch the landing page and take the token embedded in its inline script.
    ///
    /// The token is treated as valid until the next local midnight. On failure
    /// the previously held token, if any, is kept.
    pub async fn handshake(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        let page = self.transport.get(&self.landing_url).await.map_err(|e| {
            error!(error = %e, "Landing page request failed");
            AuthError::from(e)
        })?;

        let Some(token) = extract_token(&page.body) else {
            error!(status = page.status, "No token found on landing page");
            return Err(AuthError::TokenNotFound);
        };

        let expires_at = next_local_midnight(now, self.timezone);
        debug!(token = %token, "Token set");
        info!(expires_at = %expires_at, "Session established");

        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.token = Some(token.to_string());
        state.expires_at = Some(expires_at);

        Ok(expires_at)
    }

    /// True once the expiry has passed. A session that never held a token is expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot().expires_at {
            Some(expires_at) => expires_at < now,
            None => true,
        }
    }

    /// Refresh the token if it has expired.
    ///
    /// `Ok(true)` means a new token is in place, `Ok(false)` means the token
    /// was still valid and nothing was done. Cookies are dropped before the
    /// new handshake.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<bool, AuthError> {
        if !self.is_expired(now) {
            return Ok(false);
        }

        info!("Token expired, refreshing session");
        self.transport.clear_cookies();
        self.handshake(now).await.map(|_| true)
    }

    pub fn token(&self) -> Option<String> {
        self.snapshot().token
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

pub fn extract_token(html: &str) -> Option<&str> {
    TOKEN_PATTERN
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// First midnight strictly after `now` in `timezone`, as UTC.
pub fn next_local_midnight(now: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    let local_date = now.with_timezone(&timezone).date_naive();

    local_date
        .succ_opt()
        .and_then(|tomorrow| {
            timezone
                .from_local_datetime(&tomorrow.and_time(NaiveTime::MIN))
                .earliest()
        })
        .map(|midnight| midnight.with_timezone(&Utc))
        // Midnight skipped by a DST jump; a day from now is close enough.
        .unwrap_or_else(|| now + TimeDelta::days(1))
}
