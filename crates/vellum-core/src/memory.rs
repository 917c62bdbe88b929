//! In-process reference adapter
//!
//! Keeps records and events in ordered maps behind one lock. A batch is
//! checked and applied under that lock, so every intent sees a consistent
//! view and failed intents leave no trace.

use crate::config::StoreConfig;
use crate::error::{Result, VellumError};
use crate::traits::{
    check_precondition, BackendAdapter, BackendKind, HealthStatus, Page, ProviderFactory,
    QueryRequest, WriteIntent,
};
use crate::types::event::document_expired;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

type Key = (String, String, String);

#[derive(Default)]
struct State {
    records: BTreeMap<Key, Value>,
    events: BTreeMap<Key, Value>,
}

/// Adapter over process memory
pub struct InMemoryBackend {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 100,
        }
    }

    /// Limit documents per query page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stored record count across all locations, soft-deleted included
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Stored event count across all locations
    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Raw stored form of a record, bypassing decryption
    pub fn raw_record(&self, location: &str, partition_key: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .records
            .get(&key(location, partition_key, id))
            .cloned()
    }
}

fn key(location: &str, partition_key: &str, id: &str) -> Key {
    (location.to_string(), partition_key.to_string(), id.to_string())
}

fn encode_continuation(key: &Key) -> Result<String> {
    Ok(serde_json::to_string(&(&key.1, &key.2))?)
}

fn decode_continuation(location: &str, token: &str) -> Result<Key> {
    let (partition_key, id): (String, String) = serde_json::from_str(token)
        .map_err(|e| VellumError::Serialization(format!("invalid continuation token: {e}")))?;
    Ok((location.to_string(), partition_key, id))
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn read(&self, location: &str, partition_key: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .state
            .lock()
            .records
            .get(&key(location, partition_key, id))
            .cloned())
    }

    async fn write_batch(
        &self,
        location: &str,
        partition_key: &str,
        intents: Vec<WriteIntent>,
    ) -> Result<Vec<Result<()>>> {
        let mut state = self.state.lock();
        let mut outcomes = Vec::with_capacity(intents.len());

        for intent in intents {
            let record_key = key(location, partition_key, &intent.id);
            let outcome = check_precondition(&intent, state.records.get(&record_key)).and_then(|()| {
                match intent.event_id() {
                    Some(event_id)
                        if state
                            .events
                            .contains_key(&key(location, partition_key, event_id)) =>
                    {
                        Err(VellumError::duplicate(format!("event {event_id} already exists")))
                    }
                    _ => Ok(()),
                }
            });

            if outcome.is_ok() {
                if let Some(event_id) = intent.event_id() {
                    let event_key = key(location, partition_key, event_id);
                    if let Some(event) = intent.event.clone() {
                        state.events.insert(event_key, event);
                    }
                }
                state.records.insert(record_key, intent.record);
            }
            outcomes.push(outcome);
        }

        debug!(location, partition_key, items = outcomes.len(), "memory batch applied");
        Ok(outcomes)
    }

    async fn query_page(
        &self,
        location: &str,
        request: &QueryRequest,
        continuation: Option<String>,
    ) -> Result<Page> {
        let start = match continuation {
            Some(token) => Bound::Excluded(decode_continuation(location, &token)?),
            None => Bound::Included(key(location, "", "")),
        };
        let state = self.state.lock();

        let mut documents = Vec::new();
        let mut last = None;
        for (k, document) in state.records.range((start, Bound::Unbounded)) {
            if k.0 != location {
                break;
            }
            last = Some(k);
            if request.native.matches(document) {
                documents.push(document.clone());
                if documents.len() == self.page_size {
                    break;
                }
            }
        }

        let exhausted = match last {
            Some(k) => state
                .records
                .range((Bound::Excluded(k.clone()), Bound::Unbounded))
                .next()
                .map_or(true, |(next, _)| next.0 != location),
            None => true,
        };
        let continuation = match (exhausted, last) {
            (false, Some(k)) => Some(encode_continuation(k)?),
            _ => None,
        };
        Ok(Page {
            documents,
            continuation,
        })
    }

    async fn read_events(
        &self,
        location: &str,
        partition_key: &str,
        related_id: &str,
    ) -> Result<Vec<Value>> {
        let now = Utc::now();
        let state = self.state.lock();
        Ok(state
            .events
            .range(key(location, partition_key, "")..)
            .take_while(|(k, _)| k.0 == location && k.1 == partition_key)
            .map(|(_, event)| event)
            .filter(|event| {
                event.get("relatedId").and_then(Value::as_str) == Some(related_id)
                    && !document_expired(event, now)
            })
            .cloned()
            .collect())
    }

    async fn status(&self) -> HealthStatus {
        let state = self.state.lock();
        HealthStatus::healthy()
            .with("backend", BackendKind::Memory)
            .with("records", state.records.len())
            .with("events", state.events.len())
    }
}

/// Provider factory over a shared [`InMemoryBackend`]
pub struct InMemoryFactory {
    config: StoreConfig,
    backend: Arc<InMemoryBackend>,
}

impl InMemoryFactory {
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    pub fn with_backend(config: StoreConfig, backend: Arc<InMemoryBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn backend(&self) -> &Arc<InMemoryBackend> {
        &self.backend
    }
}

#[async_trait]
impl ProviderFactory for InMemoryFactory {
    async fn initialize(&self) -> Result<()> {
        self.config.validate()
    }

    fn adapter(&self) -> Arc<dyn BackendAdapter> {
        self.backend.clone()
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }
}
