//! Storage mutation notifications and the signed deltas derived from them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of mutation that produced a [`StorageEvent`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageEventType {
    Created,
    Removed,
}

impl StorageEventType {
    /// Sign applied to the object size when turning the event into a delta.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Created => 1,
            Self::Removed => -1,
        }
    }
}

/// Notification emitted by the object store whenever an object is created or removed.
///
/// An event is produced once per underlying mutation but may be delivered any number
/// of times to a consumer. It is never modified after it is produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// Identifier generated when the event is produced. Redeliveries carry the same
    /// identifier. It is used for tracing only: consumers do not deduplicate on it.
    pub event_id: Uuid,
    /// Bucket (collection) the object belongs to.
    pub subject: String,
    /// Object key within the subject.
    pub key: String,
    pub event_type: StorageEventType,
    /// Object size in bytes. For `REMOVED` events a size of zero means the size was not
    /// known to the producer.
    pub size: u64,
    /// Epoch milliseconds at which the mutation was observed.
    pub observed_at: i64,
}

impl StorageEvent {
    pub fn new(
        subject: impl Into<String>,
        key: impl Into<String>,
        event_type: StorageEventType,
        size: u64,
        observed_at: i64,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            subject: subject.into(),
            key: key.into(),
            event_type,
            size,
            observed_at,
        }
    }

    pub fn created(subject: impl Into<String>, key: impl Into<String>, size: u64, at: i64) -> Self {
        Self::new(subject, key, StorageEventType::Created, size, at)
    }

    pub fn removed(subject: impl Into<String>, key: impl Into<String>, size: u64, at: i64) -> Self {
        Self::new(subject, key, StorageEventType::Removed, size, at)
    }
}

/// One record of the structured delta log: the signed size change caused by a single
/// processed [`StorageEvent`].
///
/// `timestamp` is the wall-clock emission time (epoch milliseconds), which is what the
/// metric window is evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeltaLogRecord {
    #[serde(rename = "bucket")]
    pub subject: String,
    #[serde(rename = "object_name")]
    pub key: String,
    pub size_delta: i64,
    pub timestamp: i64,
}

impl DeltaLogRecord {
    /// Builds the record for `event` given the resolved object size.
    pub fn for_event(event: &StorageEvent, size: u64, timestamp: i64) -> Self {
        let magnitude = i64::try_from(size).unwrap_or(i64::MAX);
        Self {
            subject: event.subject.clone(),
            key: event.key.clone(),
            size_delta: event.event_type.sign() * magnitude,
            timestamp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_wire_format() {
        let event = StorageEvent::created("bucket", "a.txt", 18, 1_000);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "CREATED");
        assert_eq!(json["observedAt"], 1_000);
        assert_eq!(json["key"], "a.txt");

        let removed = StorageEvent::removed("bucket", "a.txt", 18, 2_000);
        assert_eq!(
            serde_json::to_value(&removed).unwrap()["eventType"],
            "REMOVED"
        );
        assert_ne!(event.event_id, removed.event_id);
    }

    #[test]
    fn delta_sign_follows_event_type() {
        let created = StorageEvent::created("b", "k", 30, 0);
        let removed = StorageEvent::removed("b", "k", 30, 0);
        assert_eq!(DeltaLogRecord::for_event(&created, 30, 5).size_delta, 30);
        assert_eq!(DeltaLogRecord::for_event(&removed, 30, 5).size_delta, -30);
        assert_eq!(DeltaLogRecord::for_event(&removed, 0, 5).size_delta, 0);
    }

    #[test]
    fn delta_record_is_a_json_log_line() {
        let record = DeltaLogRecord {
            subject: "b".to_string(),
            key: "k".to_string(),
            size_delta: -7,
            timestamp: 42,
        };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"bucket":"b","object_name":"k","size_delta":-7,"timestamp":42}"#
        );
    }
}
