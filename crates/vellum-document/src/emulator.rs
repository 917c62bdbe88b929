//! In-process stand-in for the document service
//!
//! Implements [`DocumentClient`] with the service's observable semantics:
//! all-or-nothing partition batches with per-operation status codes, native
//! queries over the full query description, offset continuations and
//! per-item `ttl` expiry. Used for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use vellum_core::query::eval;
use vellum_core::types::wire;

use crate::client::{
    status, AccountProperties, BatchOperation, BatchResponse, ClientError, ClientResult,
    DocumentClient, DocumentQuery, OperationResult, QueryResponse,
};

type ItemKey = (String, String);

#[derive(Debug, Clone)]
struct StoredItem {
    document: Value,
    written_at: DateTime<Utc>,
}

impl StoredItem {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.document.get("ttl").and_then(Value::as_i64) {
            Some(ttl) if ttl > 0 => self.written_at + Duration::seconds(ttl) <= now,
            _ => false,
        }
    }

    fn etag(&self) -> Option<&str> {
        self.document.get(wire::ETAG).and_then(Value::as_str)
    }
}

type Container = BTreeMap<ItemKey, StoredItem>;

#[derive(Default)]
struct State {
    containers: HashMap<String, Container>,
    injected: Vec<u16>,
}

pub struct InMemoryDocumentClient {
    account: String,
    state: Mutex<State>,
}

impl InMemoryDocumentClient {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the next `execute_batch` call with `status_code`
    pub fn inject_failure(&self, status_code: u16) {
        self.state.lock().injected.push(status_code);
    }

    /// Stored form of an item, bypassing expiry
    pub fn raw_item(&self, container: &str, partition_key: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|c| c.get(&(partition_key.to_string(), id.to_string())))
            .map(|item| item.document.clone())
    }
}

fn container<'a>(state: &'a mut State, name: &str) -> ClientResult<&'a mut Container> {
    state
        .containers
        .get_mut(name)
        .ok_or_else(|| ClientError::new(status::NOT_FOUND, format!("container {name} does not exist")))
}

fn item_id(item: &Value) -> Option<&str> {
    item.get(wire::ID).and_then(Value::as_str)
}

/// Status of one operation against the container overlaid with staged writes
fn apply(
    existing: &Container,
    staged: &mut BTreeMap<ItemKey, Value>,
    partition_key: &str,
    operation: BatchOperation,
    now: DateTime<Utc>,
) -> u16 {
    let visible = |staged: &BTreeMap<ItemKey, Value>, key: &ItemKey| -> Option<Option<String>> {
        if let Some(doc) = staged.get(key) {
            return Some(doc.get(wire::ETAG).and_then(Value::as_str).map(String::from));
        }
        existing
            .get(key)
            .filter(|item| !item.is_expired(now))
            .map(|item| item.etag().map(String::from))
    };

    let (id, item, if_match, create) = match operation {
        BatchOperation::Create { item } => match item_id(&item) {
            Some(id) => (id.to_string(), item, None, true),
            None => return status::BAD_REQUEST,
        },
        BatchOperation::Replace { id, item, if_match } => (id, item, if_match, false),
    };
    if item.get(wire::PARTITION_KEY).and_then(Value::as_str) != Some(partition_key) {
        return status::BAD_REQUEST;
    }

    let key = (partition_key.to_string(), id);
    match (visible(staged, &key), create) {
        (Some(_), true) => status::CONFLICT,
        (None, true) => {
            staged.insert(key, item);
            status::CREATED
        }
        (None, false) => status::NOT_FOUND,
        (Some(current), false) => {
            if if_match.is_some() && if_match != current {
                return status::PRECONDITION_FAILED;
            }
            staged.insert(key, item);
            status::OK
        }
    }
}

#[async_trait]
impl DocumentClient for InMemoryDocumentClient {
    async fn create_container_if_not_exists(&self, container: &str) -> ClientResult<()> {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn read_item(&self, name: &str, partition_key: &str, id: &str) -> ClientResult<Value> {
        let now = Utc::now();
        let mut state = self.state.lock();
        container(&mut state, name)?
            .get(&(partition_key.to_string(), id.to_string()))
            .filter(|item| !item.is_expired(now))
            .map(|item| item.document.clone())
            .ok_or_else(|| ClientError::new(status::NOT_FOUND, format!("item {id} not found")))
    }

    async fn execute_batch(
        &self,
        name: &str,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> ClientResult<BatchResponse> {
        let now = Utc::now();
        let mut state = self.state.lock();
        if !state.injected.is_empty() {
            let code = state.injected.remove(0);
            return Err(ClientError::new(code, "injected failure"));
        }
        let existing = container(&mut state, name)?;

        let mut staged = BTreeMap::new();
        let mut codes = Vec::with_capacity(operations.len());
        let mut failed = false;
        for operation in operations {
            if failed {
                codes.push(status::FAILED_DEPENDENCY);
                continue;
            }
            let code = apply(existing, &mut staged, partition_key, operation, now);
            failed = !status::is_success(code);
            codes.push(code);
        }

        if failed {
            // nothing commits; every operation but the culprit reports 424
            for code in codes.iter_mut() {
                if status::is_success(*code) {
                    *code = status::FAILED_DEPENDENCY;
                }
            }
        } else {
            for (key, document) in staged {
                existing.insert(
                    key,
                    StoredItem {
                        document,
                        written_at: now,
                    },
                );
            }
        }

        Ok(BatchResponse {
            results: codes
                .into_iter()
                .map(|status_code| OperationResult { status_code })
                .collect(),
        })
    }

    async fn query(
        &self,
        name: &str,
        query: &DocumentQuery,
        continuation: Option<String>,
    ) -> ClientResult<QueryResponse> {
        let offset = match continuation {
            Some(token) => token.parse::<usize>().map_err(|_| {
                ClientError::new(status::BAD_REQUEST, "malformed continuation token")
            })?,
            None => 0,
        };

        let now = Utc::now();
        let mut state = self.state.lock();
        let documents: Vec<Value> = container(&mut state, name)?
            .iter()
            .filter(|((pk, _), item)| {
                query.partition_key.as_deref().map_or(true, |p| p == pk.as_str())
                    && !item.is_expired(now)
                    && query.filter.matches(&item.document)
            })
            .map(|(_, item)| item.document.clone())
            .collect();
        drop(state);

        let results = eval::replay(documents, &query.spec.ops);
        let end = (offset + query.max_item_count.max(1)).min(results.len());
        let items = results.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
        Ok(QueryResponse {
            items,
            continuation: (end < results.len()).then(|| end.to_string()),
        })
    }

    async fn read_account(&self) -> ClientResult<AccountProperties> {
        Ok(AccountProperties {
            id: self.account.clone(),
            readable_regions: vec!["local".into()],
            writable_regions: vec!["local".into()],
        })
    }
}
