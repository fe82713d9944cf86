//! Canonical message shape and ingestion of raw records.
//!
//! History, live events and local submissions all arrive with slightly
//! different field names. Everything goes through [`normalize`] once, driven
//! by the mapping tables below, so the rest of the crate only ever sees
//! [`Message`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// Prefix of client-generated ids for messages not yet acknowledged.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Accepted source fields per canonical field, in priority order.
const ID_FIELDS: &[&str] = &["id", "_id", "message_id", "messageId"];
const SENDER_FIELDS: &[&str] = &["sender_id", "senderId", "user_id"];
/// Nested objects that may carry the sender as `{ "id": ... }`.
const SENDER_OBJECT_FIELDS: &[&str] = &["sender", "user"];
const CONTENT_FIELDS: &[&str] = &["content", "text", "body"];
const CREATED_AT_FIELDS: &[&str] = &["created_at", "createdAt", "timestamp"];
const ROOM_FIELDS: &[&str] = &["room_id", "roomId"];
const STATUS_FIELDS: &[&str] = &["status"];

/// Delivery status of a message in the merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistic entry, send in flight
    Sending,
    /// Authoritative copy (anything ingested without a status)
    #[default]
    Sent,
    /// Send failed and no delivered copy was found
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Message {
    /// Build an optimistic message in the `Sending` state.
    pub fn optimistic(
        temp_id: String,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        room_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: temp_id,
            sender_id: sender_id.into(),
            content: content.into(),
            created_at,
            status: MessageStatus::Sending,
            room_id: Some(room_id.into()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }
}

/// Generate a temporary id for `now`, avoiding ids already in use.
///
/// Two submissions inside the same millisecond get a `-<n>` suffix.
pub fn temp_id(now: DateTime<Utc>, in_use: impl Fn(&str) -> bool) -> String {
    let base = format!("{}{}", TEMP_ID_PREFIX, now.timestamp_millis());
    if !in_use(&base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !in_use(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Turn a raw record into a canonical [`Message`].
pub fn normalize(raw: &Value) -> Result<Message, IngestError> {
    let obj = raw.as_object().ok_or(IngestError::NotAnObject(kind_of(raw)))?;

    let sender_id = first_id(obj, SENDER_FIELDS)
        .or_else(|| nested_sender(obj))
        .ok_or(IngestError::MissingField("sender_id"))?;

    let created_at = match first_present(obj, CREATED_AT_FIELDS) {
        Some(v) => parse_timestamp(v)?,
        None => return Err(IngestError::MissingField("created_at")),
    };

    let content = first_present(obj, CONTENT_FIELDS)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let id = first_id(obj, ID_FIELDS)
        .unwrap_or_else(|| format!("anon-{}-{}", sender_id, created_at.timestamp_millis()));

    let status = first_present(obj, STATUS_FIELDS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    Ok(Message {
        id,
        sender_id,
        content,
        created_at,
        status,
        room_id: first_id(obj, ROOM_FIELDS),
    })
}

/// Room id carried by a raw record, if any.
pub fn raw_room_id(raw: &Value) -> Option<String> {
    raw.as_object().and_then(|obj| first_id(obj, ROOM_FIELDS))
}

fn first_present<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|f| obj.get(*f))
        .find(|v| !v.is_null())
}

/// First field holding a usable identifier (non-empty string or integer).
fn first_id(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().filter_map(|f| obj.get(*f)).find_map(id_string)
}

fn nested_sender(obj: &Map<String, Value>) -> Option<String> {
    SENDER_OBJECT_FIELDS
        .iter()
        .filter_map(|f| obj.get(*f))
        .filter_map(Value::as_object)
        .find_map(|o| o.get("id").and_then(id_string))
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>, IngestError> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| IngestError::InvalidTimestamp(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| IngestError::InvalidTimestamp(n.to_string())),
        other => Err(IngestError::InvalidTimestamp(other.to_string())),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
