//! Minimal Telegram Bot API client.
//!
//! Covers what a notification relay needs: sending HTML text, dropping a
//! location pin, and long-polling for operator messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use telegram::{ParseMode, TelegramOptions, TelegramService};
//!
//! let bot = TelegramService::new(TelegramOptions::new("123:abc"));
//! bot.send_message("426355102", "<b>hello</b>", Some(ParseMode::Html)).await?;
//! bot.send_location("426355102", 52.63, 13.2).await?;
//! ```

use std::time::Duration;

pub mod error;
pub mod models;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use crate::error::{Result, TelegramError};
use crate::models::{
    ApiResponse, GetUpdatesRequest, Message, SendLocationRequest, SendMessageRequest, Update,
};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Upper bound for a single send request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TelegramOptions {
    pub bot_token: String,
    pub api_base: String,
    /// Applied to every call except long polling, which has its own bound
    pub request_timeout: Duration,
}

impl TelegramOptions {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

impl ParseMode {
    fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramService {
    options: TelegramOptions,
    client: Client,
}

impl TelegramService {
    pub fn new(options: TelegramOptions) -> Self {
        Self::with_client(options, Client::new())
    }

    pub fn with_client(options: TelegramOptions, client: Client) -> Self {
        Self { options, client }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{base}/bot{token}/{method}",
            base = self.options.api_base.trim_end_matches('/'),
            token = self.options.bot_token,
        )
    }

    /// POST `payload` to `method`. Without an explicit `timeout` the call is
    /// bounded by the configured request timeout.
    async fn call<P, T>(&self, method: &str, payload: &P, timeout: Option<Duration>) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let timeout = timeout.unwrap_or(self.options.request_timeout);
        let request = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(payload);

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let result = decode_response(status.as_u16(), &body);
        if let Err(ref e) = result {
            tracing::warn!(method, status = status.as_u16(), error = %e, "Telegram call failed");
        }
        result
    }

    /// Send a text message. `chat_id` may be a numeric id or an `@channel` name.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<Message> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: parse_mode.map(|m| m.as_str()),
        };
        self.call("sendMessage", &request, None).await
    }

    pub async fn send_location(
        &self,
        chat_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Message> {
        let request = SendLocationRequest {
            chat_id,
            latitude,
            longitude,
        };
        self.call("sendLocation", &request, None).await
    }

    /// Long-poll for new messages. Pass the last seen `update_id + 1` as `offset`
    /// to acknowledge everything before it.
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: vec!["message"],
        };
        let http_timeout = Duration::from_secs(timeout_secs) + LONG_POLL_GRACE;
        self.call("getUpdates", &request, Some(http_timeout)).await
    }
}

fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| TelegramError::Decode(e.to_string()))?;

    if !envelope.ok {
        return Err(TelegramError::Api {
            code: envelope.error_code.unwrap_or(status),
            description: envelope.description.unwrap_or_default(),
        });
    }

    envelope
        .result
        .ok_or_else(|| TelegramError::Decode("response has no result".to_string()))
}
