use crate::error::{Result, Violation};
use crate::types::field::FieldTable;
use crate::types::timestamp;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Wire names of the envelope properties shared by every record
pub mod wire {
    pub const ID: &str = "id";
    pub const PARTITION_KEY: &str = "partitionKey";
    pub const TYPE_NAME: &str = "typeName";
    pub const IS_DELETED: &str = "isDeleted";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const ETAG: &str = "etag";
    pub const VERSION: &str = "version";

    pub const ALL: [&str; 8] = [
        ID,
        PARTITION_KEY,
        TYPE_NAME,
        IS_DELETED,
        CREATED_AT,
        UPDATED_AT,
        ETAG,
        VERSION,
    ];
}

/// Separator used in event ids; record ids may not contain it
pub const ID_SEPARATOR: char = '^';

/// Versioned, soft-deletable envelope common to all stores
///
/// Identity is `(partition_key, id)`. A missing `etag` means the record has
/// never been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(rename = "id")]
    pub id: String,

    #[serde(rename = "partitionKey")]
    pub partition_key: String,

    #[serde(rename = "typeName")]
    pub type_name: String,

    #[serde(rename = "isDeleted", default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,

    #[serde(rename = "createdAt", with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Number of events written for this record
    #[serde(rename = "version", default)]
    pub version: u64,
}

impl RecordMeta {
    pub fn new(
        id: impl Into<String>,
        partition_key: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        let now = timestamp::now();
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            type_name: type_name.into(),
            is_deleted: None,
            created_at: now,
            updated_at: now,
            etag: None,
            version: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }

    /// Envelope-level checks; every problem is appended to `violations`
    pub fn validate(&self, expected_type: &str, violations: &mut Vec<Violation>) {
        if self.id.trim().is_empty() {
            violations.push(Violation::new(wire::ID, "must not be empty"));
        } else if self.id.contains(ID_SEPARATOR) {
            violations.push(Violation::new(
                wire::ID,
                format!("must not contain '{ID_SEPARATOR}'"),
            ));
        }
        if self.id.chars().any(char::is_control) {
            violations.push(Violation::new(wire::ID, "must not contain control characters"));
        }
        if self.partition_key.trim().is_empty() {
            violations.push(Violation::new(wire::PARTITION_KEY, "must not be empty"));
        }
        if self.partition_key.chars().any(char::is_control) {
            violations.push(Violation::new(
                wire::PARTITION_KEY,
                "must not contain control characters",
            ));
        }
        if self.type_name != expected_type {
            violations.push(Violation::new(
                wire::TYPE_NAME,
                format!("expected {expected_type}, found {}", self.type_name),
            ));
        }
    }
}

/// A logical record type stored through a command provider
///
/// Implementors are plain structs that flatten a [`RecordMeta`] and give every
/// property an explicit wire name, e.g.:
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Widget {
///     #[serde(flatten)]
///     meta: RecordMeta,
///     #[serde(rename = "publicField", skip_serializing_if = "Option::is_none")]
///     public_field: Option<String>,
/// }
/// ```
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Logical type name, bound to a location in `StoreConfig`
    const TYPE_NAME: &'static str;

    /// Allocate a new record with default field values
    fn new(meta: RecordMeta) -> Self;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Accessor table for the type's declared fields, built once
    fn fields() -> &'static FieldTable<Self>;

    /// Type-specific validation; push every violation found
    fn validate(&self, _violations: &mut Vec<Violation>) {}
}

/// Serialize a record into its stored document form
pub fn to_document<R: Record>(record: &R) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}

/// Deserialize a stored document; unknown properties are ignored
pub fn from_document<R: Record>(document: Value) -> Result<R> {
    Ok(serde_json::from_value(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_wire_names_and_null_omission() {
        let meta = RecordMeta::new("X", "P", "Widget");
        let doc = serde_json::to_value(&meta).unwrap();
        let obj = doc.as_object().unwrap();
        assert!(obj.contains_key("partitionKey"));
        assert!(obj.contains_key("typeName"));
        assert!(!obj.contains_key("etag"));
        assert!(!obj.contains_key("isDeleted"));
    }

    #[test]
    fn test_meta_tolerates_unknown_fields() {
        let meta: RecordMeta = serde_json::from_value(serde_json::json!({
            "id": "X",
            "partitionKey": "P",
            "typeName": "Widget",
            "createdAt": "2024-01-01T00:00:00.000000Z",
            "updatedAt": "2024-01-01T00:00:00.000000Z",
            "_ts": 1704067200
        }))
        .unwrap();
        assert_eq!(meta.version, 0);
        assert!(!meta.is_deleted());
    }

    #[test]
    fn test_envelope_validation_reports_all() {
        let mut meta = RecordMeta::new("", "", "Gadget");
        meta.id = "a^b".into();
        meta.partition_key = String::new();
        let mut violations = Vec::new();
        meta.validate("Widget", &mut violations);
        assert_eq!(violations.len(), 3);
    }
}
