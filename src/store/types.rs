//! Types for the realtime record store: keys, raw feed entries, decoded sightings and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::map::LatLng;

/// Store-assigned key of a sighting record.
///
/// Keys are opaque to this crate but ordered: the store hands them out so that
/// lexicographic order follows creation order on the writing client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A raw `{key, value}` pair as emitted by the store's append feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// The key the store assigned to the record.
    pub key: RecordKey,
    /// The undecoded record value.
    pub value: serde_json::Value,
}

impl FeedEntry {
    pub fn new(key: impl Into<RecordKey>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Record value exactly as stored under a key.
///
/// Records written by the first version of the client used `name` and `foundby`,
/// both are still accepted when decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSighting {
    #[serde(alias = "name")]
    subject_name: String,
    latitude: f64,
    longitude: f64,
    #[serde(alias = "foundby")]
    reporter_id: String,
    when: i64,
}

/// A decoded, validated sighting record.
#[derive(Debug, Clone, PartialEq)]
pub struct SightingRecord {
    /// Store-assigned identity of the record.
    pub key: RecordKey,
    /// Name of the creature that was sighted.
    pub subject_name: String,
    /// Where the creature was sighted.
    pub position: LatLng,
    /// Identifier of the user who reported the sighting.
    pub reporter_id: String,
    /// Server-assigned creation time.
    pub when: DateTime<Utc>,
}

impl SightingRecord {
    /// Decode and validate a raw feed entry.
    pub fn decode(entry: &FeedEntry) -> Result<Self, DecodeError> {
        let stored: StoredSighting = serde_json::from_value(entry.value.clone())?;

        let subject_name = stored.subject_name.trim();
        if subject_name.is_empty() {
            return Err(DecodeError::EmptyName);
        }

        let position = LatLng::new(stored.latitude, stored.longitude);
        if !position.is_valid() {
            return Err(DecodeError::InvalidPosition {
                latitude: stored.latitude,
                longitude: stored.longitude,
            });
        }

        let when = DateTime::<Utc>::from_timestamp_millis(stored.when)
            .ok_or(DecodeError::InvalidTimestamp(stored.when))?;

        Ok(Self {
            key: entry.key.clone(),
            subject_name: subject_name.to_string(),
            position,
            reporter_id: stored.reporter_id,
            when,
        })
    }
}

/// Value written to the store for a new sighting.
///
/// `when` carries the store's server-timestamp sentinel, the store replaces it with
/// the acknowledged write time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SightingWrite {
    pub subject_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reporter_id: String,
    pub when: serde_json::Value,
}

impl SightingWrite {
    pub fn to_value(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Reasons a single feed entry could not be turned into a [`SightingRecord`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed record: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("Record has an empty subject name")]
    EmptyName,

    #[error("Record position out of range: ({latitude}, {longitude})")]
    InvalidPosition { latitude: f64, longitude: f64 },

    #[error("Record timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// Error types for reads from and writes to the record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Feed closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_current_field_names() {
        let entry = FeedEntry::new(
            "k1",
            json!({
                "subjectName": " Pidgey ",
                "latitude": 51.5,
                "longitude": -0.12,
                "reporterId": "user-1",
                "when": 1_470_000_000_000i64,
            }),
        );

        let record = SightingRecord::decode(&entry).expect("record should decode");
        assert_eq!(record.key, RecordKey::new("k1"));
        assert_eq!(record.subject_name, "Pidgey");
        assert_eq!(record.position, LatLng::new(51.5, -0.12));
        assert_eq!(record.reporter_id, "user-1");
        assert_eq!(record.when.timestamp_millis(), 1_470_000_000_000);
    }

    #[test]
    fn decodes_legacy_field_names() {
        let entry = FeedEntry::new(
            "k2",
            json!({
                "name": "Rattata",
                "latitude": 10.0,
                "longitude": 20.0,
                "foundby": "uid-9",
                "when": 1_470_000_000_000i64,
            }),
        );

        let record = SightingRecord::decode(&entry).expect("legacy record should decode");
        assert_eq!(record.subject_name, "Rattata");
        assert_eq!(record.reporter_id, "uid-9");
    }

    #[test]
    fn rejects_missing_fields_and_bad_positions() {
        let missing = FeedEntry::new("k3", json!({ "subjectName": "Pidgey" }));
        assert!(matches!(
            SightingRecord::decode(&missing),
            Err(DecodeError::Shape(_))
        ));

        let out_of_range = FeedEntry::new(
            "k4",
            json!({
                "subjectName": "Pidgey",
                "latitude": 95.0,
                "longitude": 20.0,
                "reporterId": "u",
                "when": 0,
            }),
        );
        assert!(matches!(
            SightingRecord::decode(&out_of_range),
            Err(DecodeError::InvalidPosition { .. })
        ));

        let blank = FeedEntry::new(
            "k5",
            json!({
                "subjectName": "   ",
                "latitude": 1.0,
                "longitude": 1.0,
                "reporterId": "u",
                "when": 0,
            }),
        );
        assert!(matches!(
            SightingRecord::decode(&blank),
            Err(DecodeError::EmptyName)
        ));
    }

    #[test]
    fn write_serializes_to_wire_shape() {
        let write = SightingWrite {
            subject_name: "Pidgey".to_string(),
            latitude: 10.0,
            longitude: 20.0,
            reporter_id: "user-1".to_string(),
            when: json!({ ".sv": "timestamp" }),
        };

        let value = write.to_value().expect("write should serialize");
        assert_eq!(
            value,
            json!({
                "subjectName": "Pidgey",
                "latitude": 10.0,
                "longitude": 20.0,
                "reporterId": "user-1",
                "when": { ".sv": "timestamp" },
            })
        );
    }
}
