use crate::error::{Result, VellumError};
use crate::query::{NativeFilter, QuerySpec};
use crate::traits::health::HealthStatus;
use crate::types::wire;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    KeyValue,
    Document,
    Relational,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::KeyValue => "key-value",
            BackendKind::Document => "document",
            BackendKind::Relational => "relational",
            BackendKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// How an adapter executes queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Store evaluates `QueryRequest::native`; the provider replays the residual
    Pushdown,
    /// Store's own query provider executes `QueryRequest::spec` in full
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

/// One record/event pair to be written atomically
#[derive(Debug, Clone)]
pub struct WriteIntent {
    pub id: String,
    pub kind: WriteKind,
    /// ETag read by the caller; `None` for creates
    pub expected_etag: Option<String>,
    /// Record in stored form
    pub record: Value,
    /// Event in stored form; `None` when events are disabled for the type
    pub event: Option<Value>,
}

impl WriteIntent {
    pub fn event_id(&self) -> Option<&str> {
        self.event
            .as_ref()
            .and_then(|e| e.get(wire::ID))
            .and_then(Value::as_str)
    }

    pub fn new_etag(&self) -> Option<&str> {
        self.record.get(wire::ETAG).and_then(Value::as_str)
    }
}

/// Evaluate an intent's precondition against the currently stored record
///
/// Creates require absence; updates and deletes require a live record whose
/// ETag equals the one the caller read.
pub fn check_precondition(intent: &WriteIntent, current: Option<&Value>) -> Result<()> {
    match (intent.kind, current) {
        (WriteKind::Create, None) => Ok(()),
        (WriteKind::Create, Some(_)) => Err(VellumError::duplicate(format!(
            "record {} already exists",
            intent.id
        ))),
        (_, None) => Err(VellumError::NotFound(format!("record {}", intent.id))),
        (_, Some(current)) => {
            if current.get(wire::IS_DELETED).and_then(Value::as_bool) == Some(true) {
                return Err(VellumError::NotFound(format!("record {} is deleted", intent.id)));
            }
            let stored = current.get(wire::ETAG).and_then(Value::as_str);
            if stored.is_some() && stored == intent.expected_etag.as_deref() {
                Ok(())
            } else {
                Err(VellumError::etag_mismatch(format!(
                    "record {} was modified concurrently",
                    intent.id
                )))
            }
        }
    }
}

/// What a query page request carries to the store
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub type_name: String,
    /// Type/not-deleted base filter plus pushed conjuncts
    pub native: NativeFilter,
    /// Full checked description, for [`QueryMode::Native`] stores
    pub spec: QuerySpec,
}

/// One page of stored documents
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<Value>,
    /// Resume token; `None` once the store has no more results
    pub continuation: Option<String>,
}

/// Physical I/O against one backing store
///
/// Adapters operate on stored JSON documents and translate every native error
/// into a [`VellumError`]. The handle is shared by all providers and must be
/// safe for concurrent use.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn query_mode(&self) -> QueryMode {
        QueryMode::Pushdown
    }

    /// Point read by identity; soft-deleted records are returned as stored
    async fn read(&self, location: &str, partition_key: &str, id: &str) -> Result<Option<Value>>;

    /// Write every intent of one partition in the store's transaction primitive
    ///
    /// Returns one outcome per intent, in order. A failed outcome means that
    /// intent's record and event were not written. The outer error is for
    /// faults that prevented the batch from being attempted at all.
    async fn write_batch(
        &self,
        location: &str,
        partition_key: &str,
        intents: Vec<WriteIntent>,
    ) -> Result<Vec<Result<()>>>;

    /// Fetch one page of query results
    async fn query_page(
        &self,
        location: &str,
        request: &QueryRequest,
        continuation: Option<String>,
    ) -> Result<Page>;

    /// Unexpired events of one record, in sequence order
    async fn read_events(
        &self,
        location: &str,
        partition_key: &str,
        related_id: &str,
    ) -> Result<Vec<Value>>;

    async fn status(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(kind: WriteKind, expected: Option<&str>) -> WriteIntent {
        WriteIntent {
            id: "X".into(),
            kind,
            expected_etag: expected.map(String::from),
            record: json!({"id": "X", "etag": "new"}),
            event: Some(json!({"id": "EVENT^X^00000001"})),
        }
    }

    #[test]
    fn test_preconditions() {
        let stored = json!({"id": "X", "etag": "e1"});
        let deleted = json!({"id": "X", "etag": "e1", "isDeleted": true});

        assert!(check_precondition(&intent(WriteKind::Create, None), None).is_ok());
        let dup = check_precondition(&intent(WriteKind::Create, None), Some(&stored)).unwrap_err();
        assert_eq!(dup.status().code(), 409);

        assert!(check_precondition(&intent(WriteKind::Update, Some("e1")), Some(&stored)).is_ok());
        let stale =
            check_precondition(&intent(WriteKind::Update, Some("e0")), Some(&stored)).unwrap_err();
        assert_eq!(stale.status().code(), 412);

        let missing = check_precondition(&intent(WriteKind::Delete, Some("e1")), None).unwrap_err();
        assert!(matches!(missing, VellumError::NotFound(_)));
        let gone =
            check_precondition(&intent(WriteKind::Update, Some("e1")), Some(&deleted)).unwrap_err();
        assert!(matches!(gone, VellumError::NotFound(_)));
    }

    #[test]
    fn test_intent_accessors() {
        let i = intent(WriteKind::Create, None);
        assert_eq!(i.event_id(), Some("EVENT^X^00000001"));
        assert_eq!(i.new_etag(), Some("new"));
    }
}
