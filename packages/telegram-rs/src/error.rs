use thiserror::Error;

/// Errors returned by [`crate::TelegramService`].
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Request never produced a usable HTTP response (DNS, connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Bot API answered with `ok: false`
    #[error("telegram api error {code}: {description}")]
    Api { code: u16, description: String },

    /// Body was not a Bot API envelope
    #[error("failed to decode telegram response: {0}")]
    Decode(String),
}

impl TelegramError {
    pub fn is_network(&self) -> bool {
        matches!(self, TelegramError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, TelegramError>;
