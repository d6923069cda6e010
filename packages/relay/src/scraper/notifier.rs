use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

use super::dedup::DedupStore;
use super::models::EncounterRecord;
use crate::error::DeliveryError;
use crate::kernel::BaseDelivery;

/// Turns encounters into chat messages and hands them to the delivery channel.
pub struct Notifier {
    delivery: Arc<dyn BaseDelivery>,
    destination: String,
    timezone: Tz,
}

impl Notifier {
    pub fn new(
        delivery: Arc<dyn BaseDelivery>,
        destination: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            delivery,
            destination: destination.into(),
            timezone,
        }
    }

    /// Send `record` as a text message followed by its location, then
    /// remember it in `store`.
    ///
    /// The record is remembered even when sending fails, so a failed
    /// notification is never retried.
    pub async fn notify(
        &self,
        record: &EncounterRecord,
        now: DateTime<Utc>,
        store: &DedupStore,
    ) -> Result<(), DeliveryError> {
        let message = format_message(record, now, self.timezone);
        let outcome = self.deliver(record, &message).await;

        store.remember(record.id.clone(), record.despawn_time);
        debug!(
            encounter_id = %record.id,
            delivered = outcome.is_ok(),
            "Encounter remembered"
        );

        outcome
    }

    async fn deliver(&self, record: &EncounterRecord, message: &str) -> Result<(), DeliveryError> {
        self.delivery.send_text(&self.destination, message).await?;
        self.delivery
            .send_location(&self.destination, record.latitude, record.longitude)
            .await
    }
}

/// Render the HTML notification for `record` as seen at `now`.
pub fn format_message(record: &EncounterRecord, now: DateTime<Utc>, timezone: Tz) -> String {
    let level_cp = match record.known_level() {
        Some(level) => match record.cp {
            Some(cp) => format!("Lvl {level} - <b>{cp} CP</b>"),
            None => format!("Lvl {level} - CP ???"),
        },
        None => "Lvl ??? - CP ???".to_string(),
    };

    let ivs = match record.stats() {
        Some([attack, defense, stamina]) => format!("{attack:X}{defense:X}{stamina:X}"),
        None => "???".to_string(),
    };

    let verified = if record.verified_despawn { "✅" } else { "❌" };

    let until = record.despawn_time.with_timezone(&timezone).format("%H:%M:%S");
    let remaining = (record.despawn_time.timestamp() - now.timestamp()).max(0);
    let (mins, secs) = (remaining / 60, remaining % 60);

    format!(
        "{} {level_cp} ({ivs}) {verified}\nuntil <b>{until}</b> (remaining <b>{mins}m {secs}s</b>)",
        escape_html(&record.name)
    )
}

/// Escape the characters the chat's HTML parse mode treats as markup.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
