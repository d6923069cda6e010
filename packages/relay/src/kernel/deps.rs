//! Relay dependencies (using traits for testability)
//!
//! The engine only ever sees the `Base*` traits; this module holds the
//! container it is built from and the adapter onto the real Telegram client.

use async_trait::async_trait;
use std::sync::Arc;
use telegram::{ParseMode, TelegramError, TelegramService};

use crate::error::DeliveryError;
use crate::kernel::{BaseClock, BaseDelivery, BaseTransport};

// =============================================================================
// TelegramService Adapter (implements BaseDelivery trait)
// =============================================================================

/// Wrapper around TelegramService that implements BaseDelivery trait
pub struct TelegramAdapter(pub Arc<TelegramService>);

impl TelegramAdapter {
    pub fn new(service: Arc<TelegramService>) -> Self {
        Self(service)
    }
}

fn to_delivery_error(e: TelegramError) -> DeliveryError {
    if e.is_network() {
        DeliveryError::Network(e.to_string())
    } else {
        DeliveryError::Rejected(e.to_string())
    }
}

#[async_trait]
impl BaseDelivery for TelegramAdapter {
    async fn send_text(&self, destination: &str, message: &str) -> Result<(), DeliveryError> {
        self.0
            .send_message(destination, message, Some(ParseMode::Html))
            .await
            .map(|_| ())
            .map_err(to_delivery_error)
    }

    async fn send_location(
        &self,
        destination: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DeliveryError> {
        self.0
            .send_location(destination, latitude, longitude)
            .await
            .map(|_| ())
            .map_err(to_delivery_error)
    }
}

// =============================================================================
// RelayDeps
// =============================================================================

/// External collaborators an engine is constructed with
#[derive(Clone)]
pub struct RelayDeps {
    pub transport: Arc<dyn BaseTransport>,
    pub delivery: Arc<dyn BaseDelivery>,
    pub clock: Arc<dyn BaseClock>,
}

impl RelayDeps {
    pub fn new(
        transport: Arc<dyn BaseTransport>,
        delivery: Arc<dyn BaseDelivery>,
        clock: Arc<dyn BaseClock>,
    ) -> Self {
        Self {
            transport,
            delivery,
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use telegram::TelegramOptions;

    #[test]
    fn api_errors_are_rejections() {
        let err = to_delivery_error(TelegramError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".into(),
        });
        assert!(matches!(err, DeliveryError::Rejected(msg) if msg.contains("blocked")));
    }

    #[test]
    fn decode_errors_are_rejections() {
        let err = to_delivery_error(TelegramError::Decode("eof".into()));
        assert!(matches!(err, DeliveryError::Rejected(_)));
    }

    #[tokio::test]
    async fn unanswered_send_times_out_as_network_error() {
        // accepts connections and never writes a response
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let options = TelegramOptions::new("123:abc")
            .with_api_base(format!("http://{addr}"))
            .with_request_timeout(Duration::from_millis(200));
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let service = TelegramService::with_client(options, client);
        let adapter = TelegramAdapter::new(Arc::new(service));

        let result = tokio::time::timeout(Duration::from_secs(5), adapter.send_text("42", "hi"))
            .await
            .expect("send should give up on its own");

        assert!(matches!(result, Err(DeliveryError::Network(_))));
    }
}
