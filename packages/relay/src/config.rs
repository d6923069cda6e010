use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::scraper::{EngineConfig, FilterParameters};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_base: String,
    pub scraper_domain: String,
    pub scraper_api_endpoint: String,
    pub poll_delay_secs: u64,
    pub cleanup_interval_secs: u64,
    pub timezone: Tz,
    pub initial_filters: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timezone = var("SCRAPER_TIMEZONE").unwrap_or_else(|| "Europe/Berlin".to_string());

        Ok(Self {
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN must be set")?,
            telegram_chat_id: var("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID must be set")?,
            telegram_api_base: var("TELEGRAM_API_BASE")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            scraper_domain: var("SCRAPER_DOMAIN").context("SCRAPER_DOMAIN must be set")?,
            scraper_api_endpoint: var("SCRAPER_API_ENDPOINT")
                .context("SCRAPER_API_ENDPOINT must be set")?,
            poll_delay_secs: positive_secs(&var, "SCRAPER_POLL_DELAY_SECS", 5)?,
            cleanup_interval_secs: positive_secs(&var, "SCRAPER_CLEANUP_INTERVAL_SECS", 600)?,
            timezone: timezone.parse().map_err(|_| {
                anyhow!("SCRAPER_TIMEZONE must be an IANA zone name, got {timezone}")
            })?,
            initial_filters: var("SCRAPER_FILTERS").filter(|f| !f.trim().is_empty()),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(
            self.scraper_domain.clone(),
            self.scraper_api_endpoint.clone(),
            self.telegram_chat_id.clone(),
        )
        .with_poll_delay(Duration::from_secs(self.poll_delay_secs))
        .with_sweep_interval(Duration::from_secs(self.cleanup_interval_secs))
        .with_timezone(self.timezone)
    }

    /// Defaults with `SCRAPER_FILTERS` applied on top
    pub fn initial_filters(&self) -> Result<FilterParameters> {
        let defaults = FilterParameters::default();
        match &self.initial_filters {
            Some(update) => defaults
                .apply_update(update)
                .context("SCRAPER_FILTERS must be a valid filter string"),
            None => Ok(defaults),
        }
    }
}

/// Whole seconds, at least 1
fn positive_secs(var: impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64> {
    let secs: u64 = match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid number"))?,
        None => default,
    };

    if secs == 0 {
        bail!("{name} must be a positive number");
    }
    Ok(secs)
}
