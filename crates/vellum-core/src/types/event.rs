use crate::types::record::ID_SEPARATOR;
use crate::types::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const EVENT_PREFIX: &str = "EVENT";

/// Build an event id: `EVENT^{record_id}^{sequence:08}`
pub fn event_id(record_id: &str, sequence: u64) -> String {
    format!("{}{sequence:08}", event_id_prefix(record_id))
}

/// Common prefix of every event id of one record: `EVENT^{record_id}^`
pub fn event_id_prefix(record_id: &str) -> String {
    format!("{EVENT_PREFIX}{ID_SEPARATOR}{record_id}{ID_SEPARATOR}")
}

/// Split an event id into `(record_id, sequence)`
pub fn parse_event_id(id: &str) -> Option<(&str, u64)> {
    let rest = id
        .strip_prefix(EVENT_PREFIX)?
        .strip_prefix(ID_SEPARATOR)?;
    let (record_id, sequence) = rest.rsplit_once(ID_SEPARATOR)?;
    if record_id.is_empty() || sequence.len() < 8 {
        return None;
    }
    Some((record_id, sequence.parse().ok()?))
}

/// Type name of the events written for `record_type`
pub fn event_type_name(record_type: &str) -> String {
    format!("{record_type}Event")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveAction {
    Created,
    Updated,
    Deleted,
}

/// One field's transition; values are in stored (encrypted) form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    #[serde(rename = "propertyPath")]
    pub property_path: String,

    #[serde(rename = "oldValue", default)]
    pub old_value: Value,

    #[serde(rename = "newValue", default)]
    pub new_value: Value,
}

/// Distributed-trace identifiers propagated from the caller into events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(rename = "traceContext", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(rename = "spanId", default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            context: None,
            trace_id: Some(trace_id.into()),
            span_id: Some(span_id.into()),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Immutable audit entry for one successful save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "id")]
    pub id: String,

    #[serde(rename = "partitionKey")]
    pub partition_key: String,

    #[serde(rename = "typeName")]
    pub type_name: String,

    #[serde(rename = "relatedId")]
    pub related_id: String,

    #[serde(rename = "relatedType")]
    pub related_type: String,

    #[serde(rename = "sequence")]
    pub sequence: u64,

    #[serde(rename = "saveAction")]
    pub save_action: SaveAction,

    /// `None` for deletes
    #[serde(rename = "changes", default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<PropertyChange>>,

    #[serde(flatten)]
    pub trace: TraceContext,

    #[serde(rename = "createdAt", with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "etag")]
    pub etag: String,

    /// Retention in seconds
    #[serde(rename = "ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    #[serde(
        rename = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Expiry check on a stored event document, for adapters that keep JSON
pub fn document_expired(document: &Value, now: DateTime<Utc>) -> bool {
    document
        .get("expiresAt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .is_some_and(|at| at.with_timezone(&Utc) <= now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_format() {
        assert_eq!(event_id("X", 1), "EVENT^X^00000001");
        assert_eq!(event_id("X", 123), "EVENT^X^00000123");
        assert_eq!(parse_event_id("EVENT^X^00000123"), Some(("X", 123)));
        assert_eq!(parse_event_id("EVENT^X^12"), None);
        assert_eq!(parse_event_id("RECORD^X^00000001"), None);
    }

    #[test]
    fn test_event_ids_sort_by_sequence() {
        let mut ids: Vec<String> = [10, 2, 1, 99].iter().map(|s| event_id("r", *s)).collect();
        ids.sort();
        assert_eq!(ids[0], "EVENT^r^00000001");
        assert_eq!(ids[3], "EVENT^r^00000099");
    }

    #[test]
    fn test_delete_event_omits_changes() {
        let now = timestamp::now();
        let event = Event {
            id: event_id("X", 3),
            partition_key: "P".into(),
            type_name: event_type_name("Widget"),
            related_id: "X".into(),
            related_type: "Widget".into(),
            sequence: 3,
            save_action: SaveAction::Deleted,
            changes: None,
            trace: TraceContext::new("t", "s"),
            created_at: now,
            updated_at: now,
            etag: "e".into(),
            ttl: None,
            expires_at: None,
        };
        let doc = serde_json::to_value(&event).unwrap();
        assert!(doc.get("changes").is_none());
        assert_eq!(doc["traceId"], "t");
        assert_eq!(doc["typeName"], "WidgetEvent");
        let back: Event = serde_json::from_value(doc).unwrap();
        assert_eq!(back, event);
    }
}
