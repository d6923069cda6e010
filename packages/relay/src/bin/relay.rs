//! Encounter Relay
//!
//! Runs the scraper engine, forwards its alerts to the configured chat and
//! accepts operator commands from that chat until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_core::commands::{dispatch, Command};
use relay_core::kernel::{RelayDeps, ReqwestTransport, SystemClock, TelegramAdapter};
use relay_core::scraper::{alert_text, Engine};
use relay_core::Config;
use telegram::{TelegramOptions, TelegramService};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Long-poll window for getUpdates
const UPDATES_TIMEOUT_SECS: u64 = 30;
const UPDATES_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_core=debug,telegram=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Encounter Relay");

    let config = Config::from_env()?;
    let initial_filters = config.initial_filters()?;

    let telegram = Arc::new(TelegramService::new(
        TelegramOptions::new(config.telegram_bot_token.clone())
            .with_api_base(config.telegram_api_base.clone()),
    ));
    let transport =
        Arc::new(ReqwestTransport::new().context("Failed to build scraper HTTP client")?);

    let deps = RelayDeps::new(
        transport,
        Arc::new(TelegramAdapter::new(telegram.clone())),
        Arc::new(SystemClock),
    );
    let engine = Arc::new(Engine::new(config.engine_config(), deps));

    tokio::spawn(forward_alerts(
        engine.clone(),
        telegram.clone(),
        config.telegram_chat_id.clone(),
    ));

    engine.start(Some(initial_filters)).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
        _ = serve_commands(engine.clone(), telegram, config.telegram_chat_id.clone()) => {}
    }

    engine.stop().await;
    tracing::info!("Killed");

    Ok(())
}

/// Send operator alerts for engine events that warrant one.
async fn forward_alerts(engine: Arc<Engine>, telegram: Arc<TelegramService>, chat_id: String) {
    let mut events = engine.subscribe();
    drop(engine);

    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(text) = alert_text(&event) else {
                    continue;
                };
                if let Err(e) = telegram.send_message(&chat_id, &text, None).await {
                    tracing::error!(error = %e, "Failed to send alert");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Alert forwarder lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Long-poll the bot for commands from the configured chat and answer them.
async fn serve_commands(engine: Arc<Engine>, telegram: Arc<TelegramService>, chat_id: String) {
    let mut offset = None;

    loop {
        let updates = match telegram.get_updates(offset, UPDATES_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "Fetching updates failed");
                tokio::time::sleep(UPDATES_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);

            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != chat_id {
                tracing::warn!(chat_id = message.chat.id, "Ignoring message from unknown chat");
                continue;
            }
            let Some(text) = message.text else {
                continue;
            };

            tracing::debug!(text = %text, "Command received");
            let reply = dispatch(&engine, Command::parse(&text)).await;
            if let Err(e) = telegram.send_message(&chat_id, &reply, None).await {
                tracing::error!(error = %e, "Failed to send reply");
            }
        }
    }
}
