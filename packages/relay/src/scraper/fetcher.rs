//! Poll request against the map endpoint and classification of its outcome.

use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::filters::FilterParameters;
use super::models::EncounterRecord;
use super::session::SessionManager;
use crate::error::FetchError;
use crate::kernel::{BaseClock, BaseTransport};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Key the endpoint lists encounters under.
const RECORDS_KEY: &str = "pokemons";

/// Category switches sent with every poll. Only encounters and invasions are enabled.
const FIXED_FLAGS: &[(&str, &str)] = &[
    ("login", "false"),
    ("expireTimestamp", "0"),
    ("pokemon", "true"),
    ("lastpokemon", "true"),
    ("pokestops", "false"),
    ("lures", "false"),
    ("quests", "false"),
    ("dustamount", "0"),
    ("reloaddustamount", "false"),
    ("nests", "false"),
    ("invasions", "true"),
    ("lastnests", "false"),
    ("communities", "false"),
    ("lastcommunities", "false"),
    ("portals", "false"),
    ("pois", "false"),
    ("lastpois", "false"),
    ("newportals", "1"),
    ("lastportals", "false"),
    ("lastpokestops", "false"),
    ("gyms", "false"),
    ("lastgyms", "false"),
    ("badges", "false"),
    ("exEligible", "false"),
    ("lastslocs", "false"),
    ("spawnpoints", "false"),
    ("scanlocations", "false"),
    ("lastspawns", "false"),
    ("minLevel", "NaN"),
    ("prevMinLevel", "0"),
    ("minPVP", ""),
    ("prevMinPVP", "0"),
    ("bigKarp", "false"),
    ("tinyRat", "false"),
    ("reids", ""),
    ("eids", "0"),
];

pub struct Fetcher {
    transport: Arc<dyn BaseTransport>,
    session: Arc<SessionManager>,
    clock: Arc<dyn BaseClock>,
    base_url: String,
    endpoint_url: String,
    filters: RwLock<FilterParameters>,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn BaseTransport>,
        session: Arc<SessionManager>,
        clock: Arc<dyn BaseClock>,
        base_url: &str,
        api_endpoint: &str,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let endpoint_url = format!("{}/{}", base_url, api_endpoint.trim_start_matches('/'));

        Self {
            transport,
            session,
            clock,
            base_url,
            endpoint_url,
            filters: RwLock::new(FilterParameters::default()),
        }
    }

    pub fn filters(&self) -> FilterParameters {
        self.filters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Replace the filters used from the next poll on.
    pub fn set_filters(&self, filters: FilterParameters) {
        *self.filters.write().unwrap_or_else(|p| p.into_inner()) = filters;
    }

    /// Ask the endpoint for the encounters matching `filters`.
    ///
    /// A 400 answer triggers a session refresh: a successful refresh yields
    /// [`FetchError::AuthRefreshed`], anything else [`FetchError::AuthUnresolved`].
    pub async fn poll(
        &self,
        filters: &FilterParameters,
    ) -> Result<Vec<EncounterRecord>, FetchError> {
        let form = self.build_form(filters);
        let headers = [
            ("Origin", self.base_url.clone()),
            ("Referer", format!("{}/", self.base_url)),
            ("X-Requested-With", "XMLHttpRequest".to_string()),
        ];

        let response = self
            .transport
            .post_form(&self.endpoint_url, &headers, &form, FETCH_TIMEOUT)
            .await?;

        match response.status {
            400 => {
                warn!("Poll rejected with 400, checking session");
                return match self.session.ensure_fresh(self.clock.now()).await {
                    Ok(true) => Err(FetchError::AuthRefreshed),
                    Ok(false) => Err(FetchError::AuthUnresolved("token not expired".to_string())),
                    Err(e) => Err(FetchError::AuthUnresolved(e.to_string())),
                };
            }
            status if !response.is_success() => {
                return Err(FetchError::UnexpectedStatus(status));
            }
            _ => {}
        }

        let records = decode_records(&response.body)?;
        debug!(count = records.len(), "Poll returned records");
        Ok(records)
    }

    fn build_form(&self, filters: &FilterParameters) -> Vec<(&'static str, String)> {
        let bbox = &filters.bbox;
        let mut form: Vec<(&'static str, String)> = FIXED_FLAGS
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect();

        form.extend([
            ("minIV", filters.min_iv.to_string()),
            ("prevMinIV", filters.prev_min_iv.to_string()),
            ("exMinIV", filters.ex_min_iv.clone()),
            ("swLat", bbox.south.to_string()),
            ("swLng", bbox.west.to_string()),
            ("neLat", bbox.north.to_string()),
            ("neLng", bbox.east.to_string()),
            ("oSwLat", bbox.south.to_string()),
            ("oSwLng", bbox.west.to_string()),
            ("oNeLat", bbox.north.to_string()),
            ("oNeLng", bbox.east.to_string()),
        ]);

        if let Some(token) = self.session.token() {
            form.push(("token", token));
        }

        form
    }
}

/// Pull the encounter list out of a poll response body.
///
/// A missing or null list means nothing to report. Elements that do not
/// decode are skipped so one odd record cannot hide the rest of the batch.
pub fn decode_records(body: &str) -> Result<Vec<EncounterRecord>, FetchError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let items = match payload.get(RECORDS_KEY) {
        None => {
            warn!(key = RECORDS_KEY, "Response has no records key");
            return Ok(Vec::new());
        }
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "`{RECORDS_KEY}` is not a list: {other}"
            )))
        }
    };

    Ok(items
        .iter()
        .filter_map(|item| match EncounterRecord::deserialize(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable record");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::kernel::test_dependencies::{encounter_json, poll_body, FakeClock, MockTransport};
    use crate::kernel::HttpResponse;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use chrono_tz::Europe::Berlin;
    use serde_json::json;

    const TOKEN_A: &str = "tokenAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const TOKEN_B: &str = "tokenBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    struct Harness {
        transport: Arc<MockTransport>,
        clock: Arc<FakeClock>,
        session: Arc<SessionManager>,
        fetcher: Fetcher,
    }

    fn harness(transport: MockTransport) -> Harness {
        let transport = Arc::new(transport);
        let clock = Arc::new(FakeClock::new(now()));
        let session = Arc::new(SessionManager::new(
            transport.clone(),
            "https://map.example",
            Berlin,
        ));
        let fetcher = Fetcher::new(
            transport.clone(),
            session.clone(),
            clock.clone(),
            "https://map.example/",
            "/query_data.php",
        );
        Harness {
            transport,
            clock,
            session,
            fetcher,
        }
    }

    #[tokio::test]
    async fn request_carries_flags_filters_and_token() {
        let h = harness(MockTransport::new().with_token(TOKEN_A));
        h.session.handshake(now()).await.unwrap();

        let filters = FilterParameters::default()
            .apply_update("iv=95&exiv=110,145&bbox=48.1,11.5,48.2,11.6")
            .unwrap();
        h.fetcher.poll(&filters).await.unwrap();

        let call = &h.transport.post_calls()[0];
        assert_eq!(call.url, "https://map.example/query_data.php");
        assert_eq!(call.header("Origin"), Some("https://map.example"));
        assert_eq!(call.header("Referer"), Some("https://map.example/"));
        assert_eq!(call.header("X-Requested-With"), Some("XMLHttpRequest"));

        let keys: Vec<&str> = call.form.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(&keys[..3], &["login", "expireTimestamp", "pokemon"]);
        assert_eq!(keys.last(), Some(&"token"));

        assert_eq!(call.field("pokemon"), Some("true"));
        assert_eq!(call.field("invasions"), Some("true"));
        assert_eq!(call.field("gyms"), Some("false"));
        assert_eq!(call.field("minLevel"), Some("NaN"));
        assert_eq!(call.field("minIV"), Some("95"));
        assert_eq!(call.field("prevMinIV"), Some("97"));
        assert_eq!(call.field("exMinIV"), Some("110,145"));
        assert_eq!(call.field("swLat"), Some("48.1"));
        assert_eq!(call.field("oNeLng"), Some("11.6"));
        assert_eq!(call.field("token"), Some(TOKEN_A));
    }

    #[tokio::test]
    async fn request_without_session_has_no_token_field() {
        let h = harness(MockTransport::new());
        h.fetcher.poll(&h.fetcher.filters()).await.unwrap();
        assert_eq!(h.transport.post_calls()[0].field("token"), None);
    }

    #[tokio::test]
    async fn returns_decoded_records() {
        let despawn = now() + TimeDelta::minutes(20);
        let body = poll_body(&[
            encounter_json("E1", "Dratini", despawn),
            encounter_json("E2", "Larvitar", despawn),
        ]);
        let h = harness(MockTransport::new().with_poll_response(200, body));

        let records = h.fetcher.poll(&h.fetcher.filters()).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn transport_failure_is_not_fatal() {
        let h = harness(MockTransport::new());
        h.transport.push_poll_error(TransportError::Timeout);

        let err = h.fetcher.poll(&h.fetcher.filters()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(TransportError::Timeout)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn bad_request_with_fresh_token_is_fatal() {
        let h = harness(MockTransport::new().with_token(TOKEN_A));
        h.session.handshake(now()).await.unwrap();
        h.transport.push_poll(HttpResponse::new(400, "Bad Request"));

        let err = h.fetcher.poll(&h.fetcher.filters()).await.unwrap_err();

        assert!(matches!(
            err,
            FetchError::AuthUnresolved(ref reason) if reason == "token not expired"
        ));
        assert!(err.is_fatal());
        assert_eq!(h.transport.cookie_clears(), 0);
    }

    #[tokio::test]
    async fn bad_request_with_expired_token_refreshes() {
        let h = harness(MockTransport::new().with_token(TOKEN_A).with_token(TOKEN_B));
        h.session.handshake(now()).await.unwrap();
        h.clock.advance(TimeDelta::days(1));
        h.transport.push_poll(HttpResponse::new(400, "Bad Request"));

        let err = h.fetcher.poll(&h.fetcher.filters()).await.unwrap_err();
        assert!(matches!(err, FetchError::AuthRefreshed));
        assert!(!err.is_fatal());

        h.fetcher.poll(&h.fetcher.filters()).await.unwrap();
        let calls = h.transport.post_calls();
        assert_eq!(calls[0].field("token"), Some(TOKEN_A));
        assert_eq!(calls[1].field("token"), Some(TOKEN_B));
    }

    #[tokio::test]
    async fn bad_request_with_failed_refresh_is_fatal() {
        let h = harness(MockTransport::new());
        h.transport.push_poll(HttpResponse::new(400, ""));

        let err = h.fetcher.poll(&h.fetcher.filters()).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::AuthUnresolved(ref reason) if reason == "No token found!"
        ));
    }

    #[tokio::test]
    async fn other_error_status_is_fatal() {
        let h = harness(MockTransport::new().with_poll_response(503, "down"));

        let err = h.fetcher.poll(&h.fetcher.filters()).await.unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus(503)));
        assert!(err.is_fatal());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = decode_records("<html>cloudflare</html>").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_or_null_records_key_is_empty() {
        assert!(decode_records(r#"{"pokestops": []}"#).unwrap().is_empty());
        assert!(decode_records(r#"{"pokemons": null}"#).unwrap().is_empty());
        assert!(decode_records(r#"{"pokemons": {}}"#).is_err());
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let body = json!({
            "pokemons": [
                { "encounter_id": "broken" },
                encounter_json("E7", "Gible", now()),
            ]
        })
        .to_string();

        let records = decode_records(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "E7");
    }
}
