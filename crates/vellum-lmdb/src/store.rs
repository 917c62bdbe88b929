use async_trait::async_trait;
use chrono::Utc;
use lmdb::{Cursor, DatabaseFlags, Environment, EnvironmentFlags, Transaction};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vellum_core::types::event::document_expired;
use vellum_core::{
    BackendAdapter, BackendKind, HealthStatus, Page, QueryRequest, Result, VellumError,
    WriteIntent,
};

use crate::config::{LmdbConfig, SyncMode};
use crate::keys::{
    decode_continuation, encode_continuation, history_prefix, item_key, location_prefix,
};
use crate::txn::{get_json, map_lmdb_error, transact, Tables, TransactItem, TransactOutcome};

struct Inner {
    env: Environment,
    tables: Tables,
    config: LmdbConfig,
}

/// LMDB-backed key-value adapter
///
/// Records and events live in two named databases keyed by
/// location/partition/id. Each partition batch is one conditional write
/// transaction; items that were cancelled only because a sibling failed are
/// resubmitted so they commit on their own.
#[derive(Clone)]
pub struct LmdbKvStore {
    inner: Arc<Inner>,
}

impl LmdbKvStore {
    pub fn open(config: LmdbConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path).map_err(|e| {
            VellumError::Unavailable(format!("cannot create {}: {e}", config.path.display()))
        })?;

        let mut env_builder = Environment::new();
        env_builder.set_max_dbs(2); // records, events
        env_builder.set_map_size(config.map_size);
        env_builder.set_max_readers(config.max_readers);

        let mut flags = EnvironmentFlags::empty();
        match config.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => flags.insert(EnvironmentFlags::NO_META_SYNC),
            SyncMode::NoSync => flags.insert(EnvironmentFlags::NO_SYNC),
        }
        env_builder.set_flags(flags);

        let env = env_builder.open(&config.path).map_err(map_lmdb_error)?;
        let tables = Tables {
            records: env
                .create_db(Some("records"), DatabaseFlags::empty())
                .map_err(map_lmdb_error)?,
            events: env
                .create_db(Some("events"), DatabaseFlags::empty())
                .map_err(map_lmdb_error)?,
        };

        info!(path = %config.path.display(), map_size = config.map_size, "opened lmdb store");
        Ok(Self {
            inner: Arc::new(Inner {
                env,
                tables,
                config,
            }),
        })
    }

    pub fn config(&self) -> &LmdbConfig {
        &self.inner.config
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }

    /// Delete every event whose `expiresAt` has passed; returns how many
    pub async fn purge_expired_events(&self) -> Result<usize> {
        self.blocking(|inner| {
            let now = Utc::now();
            let mut txn = inner.env.begin_rw_txn().map_err(map_lmdb_error)?;
            let mut expired = Vec::new();
            {
                let mut cursor = txn
                    .open_ro_cursor(inner.tables.events)
                    .map_err(map_lmdb_error)?;
                for (key, value) in cursor.iter_start() {
                    let event: Value = serde_json::from_slice(value)?;
                    if document_expired(&event, now) {
                        expired.push(key.to_vec());
                    }
                }
            }
            for key in &expired {
                txn.del(inner.tables.events, key, None)
                    .map_err(map_lmdb_error)?;
            }
            txn.commit().map_err(map_lmdb_error)?;
            if !expired.is_empty() {
                info!(purged = expired.len(), "purged expired events");
            }
            Ok(expired.len())
        })
        .await
    }
}

fn write_partition(inner: &Inner, items: Vec<TransactItem>) -> Vec<Result<()>> {
    let mut outcomes: Vec<Option<Result<()>>> = vec![None; items.len()];
    let mut pending: Vec<usize> = (0..items.len()).collect();

    while !pending.is_empty() {
        let round: Vec<&TransactItem> = pending.iter().map(|i| &items[*i]).collect();
        match transact(&inner.env, inner.tables, &round) {
            Ok(TransactOutcome::Committed) => {
                for i in pending.drain(..) {
                    outcomes[i] = Some(Ok(()));
                }
            }
            Ok(TransactOutcome::Cancelled(reasons)) => {
                let mut retry = Vec::new();
                for (i, reason) in pending.drain(..).zip(reasons) {
                    match reason {
                        Some(e) => outcomes[i] = Some(Err(e)),
                        None => retry.push(i),
                    }
                }
                pending = retry;
            }
            Err(e) => {
                warn!(error = %e, items = pending.len(), "lmdb transaction failed");
                for i in pending.drain(..) {
                    outcomes[i] = Some(Err(e.clone()));
                }
            }
        }
    }

    outcomes
        .into_iter()
        .map(|o| o.unwrap_or_else(|| Err(VellumError::internal("item was never attempted", "lmdb"))))
        .collect()
}

fn scan_page(
    inner: &Inner,
    location: &str,
    request: &QueryRequest,
    continuation: Option<Vec<u8>>,
) -> Result<Page> {
    let prefix = location_prefix(location);
    let page_size = inner.config.page_size;
    let txn = inner.env.begin_ro_txn().map_err(map_lmdb_error)?;
    let mut cursor = txn
        .open_ro_cursor(inner.tables.records)
        .map_err(map_lmdb_error)?;

    let start = continuation.clone().unwrap_or_else(|| prefix.clone());
    let mut documents = Vec::new();
    let mut last: Option<Vec<u8>> = None;
    let mut more = false;

    for (key, value) in cursor.iter_from(&start) {
        if !key.starts_with(&prefix) {
            break;
        }
        // exclusive start key
        if continuation.as_deref() == Some(key) {
            continue;
        }
        if documents.len() == page_size {
            more = true;
            break;
        }
        last = Some(key.to_vec());
        let document: Value = serde_json::from_slice(value)?;
        if request.native.matches(&document) {
            documents.push(document);
        }
    }

    let continuation = match (more, last) {
        (true, Some(key)) => Some(encode_continuation(&key)),
        _ => None,
    };
    Ok(Page {
        documents,
        continuation,
    })
}

#[async_trait]
impl BackendAdapter for LmdbKvStore {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn read(&self, location: &str, partition_key: &str, id: &str) -> Result<Option<Value>> {
        let key = item_key(location, partition_key, id);
        self.blocking(move |inner| {
            let txn = inner.env.begin_ro_txn().map_err(map_lmdb_error)?;
            get_json(&txn, inner.tables.records, &key)
        })
        .await
    }

    async fn write_batch(
        &self,
        location: &str,
        partition_key: &str,
        intents: Vec<WriteIntent>,
    ) -> Result<Vec<Result<()>>> {
        let items: Vec<TransactItem> = intents
            .into_iter()
            .map(|intent| TransactItem::new(location, partition_key, intent))
            .collect();
        debug!(location, partition_key, items = items.len(), "lmdb write batch");
        self.blocking(move |inner| Ok(write_partition(inner, items)))
            .await
    }

    async fn query_page(
        &self,
        location: &str,
        request: &QueryRequest,
        continuation: Option<String>,
    ) -> Result<Page> {
        let start = continuation
            .map(|token| decode_continuation(location, &token))
            .transpose()?;
        let location = location.to_string();
        let request = request.clone();
        let page = self
            .blocking(move |inner| scan_page(inner, &location, &request, start))
            .await?;
        debug!(documents = page.documents.len(), more = page.continuation.is_some(), "lmdb query page");
        Ok(page)
    }

    async fn read_events(
        &self,
        location: &str,
        partition_key: &str,
        related_id: &str,
    ) -> Result<Vec<Value>> {
        // ids may contain the separator, so relatedId is still checked
        let prefix = history_prefix(location, partition_key, related_id);
        let related_id = related_id.to_string();
        self.blocking(move |inner| {
            let now = Utc::now();
            let txn = inner.env.begin_ro_txn().map_err(map_lmdb_error)?;
            let mut cursor = txn
                .open_ro_cursor(inner.tables.events)
                .map_err(map_lmdb_error)?;
            let mut events = Vec::new();
            for (key, value) in cursor.iter_from(&prefix) {
                if !key.starts_with(&prefix) {
                    break;
                }
                let event: Value = serde_json::from_slice(value)?;
                if event.get("relatedId").and_then(Value::as_str) == Some(related_id.as_str())
                    && !document_expired(&event, now)
                {
                    events.push(event);
                }
            }
            Ok(events)
        })
        .await
    }

    async fn status(&self) -> HealthStatus {
        let reachable = self
            .blocking(|inner| {
                let txn = inner.env.begin_ro_txn().map_err(map_lmdb_error)?;
                txn.open_ro_cursor(inner.tables.records)
                    .map_err(map_lmdb_error)?;
                Ok(())
            })
            .await;
        let status = HealthStatus::healthy()
            .with("backend", BackendKind::KeyValue)
            .with("path", self.inner.config.path.display())
            .with("map_size", self.inner.config.map_size);
        match reachable {
            Ok(()) => status,
            Err(e) => status.with_unhealthy(e.to_string()),
        }
    }
}
