use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// A single time-limited spawn as returned by the poll endpoint.
///
/// Field names follow the upstream JSON; the Rust names are what the relay
/// cares about.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EncounterRecord {
    #[serde(rename = "encounter_id", deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(rename = "pokemon_name", default)]
    pub name: String,

    #[serde(default)]
    pub individual_attack: Option<u8>,
    #[serde(default)]
    pub individual_defense: Option<u8>,
    #[serde(default)]
    pub individual_stamina: Option<u8>,

    #[serde(default)]
    pub cp: Option<u32>,
    #[serde(default)]
    pub level: Option<u32>,

    #[serde(
        rename = "is_verified_despawn",
        default,
        deserialize_with = "bool_or_int"
    )]
    pub verified_despawn: bool,

    /// Sent as epoch milliseconds
    #[serde(rename = "disappear_time", deserialize_with = "epoch_millis")]
    pub despawn_time: DateTime<Utc>,

    pub latitude: f64,
    pub longitude: f64,
}

impl EncounterRecord {
    /// Attack/defense/stamina, only when all three are known.
    pub fn stats(&self) -> Option<[u8; 3]> {
        Some([
            self.individual_attack?,
            self.individual_defense?,
            self.individual_stamina?,
        ])
    }

    /// Level 0 is what the endpoint sends for "not scanned".
    pub fn known_level(&self) -> Option<u32> {
        self.level.filter(|level| *level > 0)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().map(|v| v != 0).unwrap_or(false)),
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected boolean, got {other}"))),
    }
}

fn epoch_millis<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| de::Error::custom(format!("expected epoch millis, got {value}")))?;

    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_full_record() {
        let record: EncounterRecord = serde_json::from_value(json!({
            "encounter_id": "11412412451251",
            "pokemon_name": "Dratini",
            "individual_attack": 15,
            "individual_defense": 10,
            "individual_stamina": 0,
            "cp": 511,
            "level": 24,
            "is_verified_despawn": true,
            "disappear_time": 1_700_000_123_456_i64,
            "latitude": 52.64,
            "longitude": 13.2,
        }))
        .unwrap();

        assert_eq!(record.id, "11412412451251");
        assert_eq!(record.stats(), Some([15, 10, 0]));
        assert_eq!(record.known_level(), Some(24));
        assert_eq!(record.despawn_time.timestamp_millis(), 1_700_000_123_456);
        assert!(record.verified_despawn);
    }

    #[test]
    fn tolerates_numeric_id_and_missing_stats() {
        let record: EncounterRecord = serde_json::from_value(json!({
            "encounter_id": 987654321,
            "pokemon_name": "Magikarp",
            "individual_attack": null,
            "individual_defense": null,
            "individual_stamina": null,
            "cp": null,
            "level": 0,
            "is_verified_despawn": 0,
            "disappear_time": 1_700_000_000_000_i64,
            "latitude": 52.0,
            "longitude": 13.0,
        }))
        .unwrap();

        assert_eq!(record.id, "987654321");
        assert_eq!(record.stats(), None);
        assert_eq!(record.known_level(), None);
        assert!(!record.verified_despawn);
    }

    #[test]
    fn partial_stats_count_as_unknown() {
        let record: EncounterRecord = serde_json::from_value(json!({
            "encounter_id": "x",
            "individual_attack": 3,
            "disappear_time": 1_700_000_000_000_i64,
            "latitude": 1.0,
            "longitude": 2.0,
        }))
        .unwrap();

        assert_eq!(record.stats(), None);
        assert_eq!(record.name, "");
    }

    #[test]
    fn rejects_missing_despawn_time() {
        let result = serde_json::from_value::<EncounterRecord>(json!({
            "encounter_id": "x",
            "latitude": 1.0,
            "longitude": 2.0,
        }));
        assert!(result.is_err());
    }
}
