//! Hasura event-trigger webhook payloads.

use std::io::Read;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The operation that fired an event trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
    /// Invoked from the console or API.
    Manual,
    /// Any operation this crate does not know about.
    #[serde(other)]
    Other,
}

/// Row images before and after the change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// The row before the change; absent for inserts.
    #[serde(default)]
    pub old: Option<Map<String, Value>>,
    /// The row after the change; absent for deletes.
    #[serde(default)]
    pub new: Option<Map<String, Value>>,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Session variables of the request that caused the change.
    #[serde(default)]
    pub session_variables: Option<Map<String, Value>>,
    /// The operation that fired the trigger.
    pub op: Op,
    /// Row images.
    pub data: RowChange,
}

/// The table an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Schema name, usually `public`.
    pub schema: String,
    /// Table name.
    pub name: String,
}

/// The trigger that fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Trigger name.
    pub name: String,
}

/// The body of an event-trigger webhook request.
///
/// ```ignore
/// let payload = EventPayload::from_slice(&body)?;
/// if payload.event.op == Op::Insert {
///     let row = payload.event.data.new.unwrap_or_default();
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// The change itself.
    pub event: EventDetails,
    /// When the event was recorded.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Event id.
    pub id: Uuid,
    /// The table that changed.
    pub table: TableMetadata,
    /// The trigger that fired, when the server reports it.
    #[serde(default)]
    pub trigger: Option<EventTrigger>,
}

impl EventPayload {
    /// Decode a webhook body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Decode a webhook body from a reader.
    pub fn from_reader(body: impl Read) -> Result<Self> {
        serde_json::from_reader(body).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Accept RFC 3339 timestamps, or timestamps without an offset as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{text}`")))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const INSERT_EVENT: &str = r#"{
        "event": {
            "session_variables": {"x-hasura-role": "admin"},
            "op": "INSERT",
            "data": {"old": null, "new": {"id": 1, "name": "ada"}}
        },
        "created_at": "2018-09-05T07:14:21.601701",
        "id": "85558393-c75d-4d2f-9c15-e80591b83894",
        "trigger": {"name": "insert_user"},
        "table": {"schema": "public", "name": "users"}
    }"#;

    #[test]
    fn test_decode_insert_event() {
        let payload = EventPayload::from_slice(INSERT_EVENT.as_bytes()).unwrap();
        assert_eq!(payload.event.op, Op::Insert);
        assert!(payload.event.data.old.is_none());
        assert_eq!(payload.event.data.new.unwrap()["name"], "ada");
        assert_eq!(payload.table.name, "users");
        assert_eq!(payload.trigger.unwrap().name, "insert_user");
        assert_eq!(payload.created_at.year(), 2018);
        assert_eq!(payload.created_at.hour(), 7);
    }

    #[test]
    fn test_decode_from_reader() {
        let payload = EventPayload::from_reader(INSERT_EVENT.as_bytes()).unwrap();
        assert_eq!(payload.id.to_string(), "85558393-c75d-4d2f-9c15-e80591b83894");
    }

    #[test]
    fn test_timestamps() {
        let with_offset = parse_timestamp("2020-01-01T12:00:00+02:00").unwrap();
        assert_eq!(with_offset.hour(), 10);
        assert!(parse_timestamp("2020-01-01 12:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_unknown_op() {
        let op: Op = serde_json::from_str(r#""TRUNCATE""#).unwrap();
        assert_eq!(op, Op::Other);
    }

    #[test]
    fn test_empty_body_is_a_decode_error() {
        assert!(matches!(EventPayload::from_slice(b""), Err(Error::Decode(_))));
    }
}
