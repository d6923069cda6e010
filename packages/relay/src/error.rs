//! Typed errors for the relay engine.
//!
//! Uses `thiserror` for library errors; `anyhow` is reserved for
//! configuration and the binary.

use thiserror::Error;

/// Failure to get any HTTP response out of the transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Errors from acquiring or refreshing the session token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No token found!")]
    TokenNotFound,

    #[error("landing page request failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of a poll request that did not yield records.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Body was not JSON, or the records key held something other than a list
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Server answered 400 and the token was successfully refreshed
    #[error("request rejected with 400, token refreshed")]
    AuthRefreshed,

    /// Server answered 400 and refreshing did not help or was not possible
    #[error("request rejected with 400 and could not be resolved: {0}")]
    AuthUnresolved(String),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
}

impl FetchError {
    /// Fatal errors stop the engine; everything else is absorbed by the next poll.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::AuthUnresolved(_) | FetchError::UnexpectedStatus(_)
        )
    }
}

/// Failure to hand a notification to the messaging channel.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Errors parsing a filter update string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },

    #[error("expected key=value, got `{0}`")]
    MalformedPair(String),
}
