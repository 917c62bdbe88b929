use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::{
    BackendAdapter, BackendKind, CompareOp, HealthStatus, NativeFilter, Page, QueryMode,
    QueryRequest, QuerySpec, Result, VellumError, WriteIntent, WriteKind,
};

use crate::client::{
    map_status, status, BatchOperation, BatchResponse, DocumentClient, DocumentQuery,
};
use crate::config::DocumentConfig;
use crate::encryption::ContainerCipher;

/// Adapter over a document database's transactional batch and query engine
///
/// A record and its event share one container and partition. Each command
/// contributes its record operation followed by its event operation, so
/// outcomes are read back positionally. Queries are handed to the service in
/// full.
pub struct DocumentAdapter {
    client: Arc<dyn DocumentClient>,
    config: DocumentConfig,
    ciphers: HashMap<String, ContainerCipher>,
}

impl DocumentAdapter {
    pub fn new(
        client: Arc<dyn DocumentClient>,
        config: DocumentConfig,
        ciphers: HashMap<String, ContainerCipher>,
    ) -> Self {
        Self {
            client,
            config,
            ciphers,
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    async fn seal(&self, container: &str, item: &mut Value) -> Result<()> {
        match self.ciphers.get(container) {
            Some(cipher) => cipher.seal(item).await,
            None => Ok(()),
        }
    }

    async fn open(&self, container: &str, item: &mut Value) -> Result<()> {
        match self.ciphers.get(container) {
            Some(cipher) => cipher.open(item).await,
            None => Ok(()),
        }
    }

    async fn operations(&self, container: &str, intent: &WriteIntent) -> Result<Vec<BatchOperation>> {
        let mut item = intent.record.clone();
        self.seal(container, &mut item).await?;
        let record = match intent.kind {
            WriteKind::Create => BatchOperation::Create { item },
            WriteKind::Update | WriteKind::Delete => BatchOperation::Replace {
                id: intent.id.clone(),
                item,
                if_match: intent.expected_etag.clone(),
            },
        };
        let mut operations = vec![record];
        if let Some(event) = &intent.event {
            operations.push(BatchOperation::Create {
                item: event.clone(),
            });
        }
        Ok(operations)
    }

    /// One native batch per round; commands cancelled only by a sibling's
    /// failure go round again without it
    async fn write_chunk(
        &self,
        container: &str,
        partition_key: &str,
        intents: &[WriteIntent],
    ) -> Vec<Result<()>> {
        let mut outcomes: Vec<Option<Result<()>>> = vec![None; intents.len()];
        let mut pending: Vec<usize> = (0..intents.len()).collect();

        while !pending.is_empty() {
            let mut operations = Vec::new();
            let mut spans = Vec::with_capacity(pending.len());
            for &i in &pending {
                match self.operations(container, &intents[i]).await {
                    Ok(ops) => {
                        spans.push((i, operations.len(), ops.len()));
                        operations.extend(ops);
                    }
                    Err(e) => outcomes[i] = Some(Err(e)),
                }
            }
            if spans.is_empty() {
                break;
            }

            let response = self
                .client
                .execute_batch(container, partition_key, operations)
                .await;
            pending = match response {
                Ok(response) if response.is_success() => {
                    for (i, _, _) in spans {
                        outcomes[i] = Some(Ok(()));
                    }
                    Vec::new()
                }
                Ok(response) => {
                    let attempted = spans.len();
                    let mut retry = Vec::new();
                    for (i, start, len) in spans {
                        match failure(&response, start, len, &intents[i]) {
                            Some(e) => outcomes[i] = Some(Err(e)),
                            None => retry.push(i),
                        }
                    }
                    if retry.len() == attempted {
                        // no culprit reported; resubmitting would not converge
                        for &i in &retry {
                            outcomes[i] = Some(Err(VellumError::internal(
                                "batch failed without a failing operation",
                                "document",
                            )));
                        }
                        retry.clear();
                    }
                    retry
                }
                Err(e) => {
                    warn!(container, partition_key, status = e.status_code, "document batch failed");
                    let error = VellumError::from(e);
                    for (i, _, _) in spans {
                        outcomes[i] = Some(Err(error.clone()));
                    }
                    Vec::new()
                }
            };
        }

        outcomes
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| Err(VellumError::internal("item was never attempted", "document")))
            })
            .collect()
    }

    async fn fetch(
        &self,
        container: &str,
        query: &DocumentQuery,
        continuation: Option<String>,
    ) -> Result<(Vec<Value>, Option<String>)> {
        let response = self.client.query(container, query, continuation).await?;
        let mut items = response.items;
        for item in &mut items {
            self.open(container, item).await?;
        }
        Ok((items, response.continuation))
    }
}

/// Error for one command's slice of a failed batch; `None` when every
/// operation in the slice only failed as a dependency
fn failure(
    response: &BatchResponse,
    start: usize,
    len: usize,
    intent: &WriteIntent,
) -> Option<VellumError> {
    let Some(results) = response.results.get(start..start + len) else {
        return Some(VellumError::internal(
            "batch response is shorter than the request",
            format!("expected {} results", start + len),
        ));
    };
    results
        .iter()
        .enumerate()
        .find(|(_, r)| !status::is_success(r.status_code) && r.status_code != status::FAILED_DEPENDENCY)
        .map(|(position, r)| {
            let target = match (position, intent.event_id()) {
                (1, Some(event_id)) => format!("event {event_id}"),
                _ => format!("record {}", intent.id),
            };
            map_status(r.status_code, target)
        })
}

#[async_trait]
impl BackendAdapter for DocumentAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn query_mode(&self) -> QueryMode {
        QueryMode::Native
    }

    async fn read(&self, location: &str, partition_key: &str, id: &str) -> Result<Option<Value>> {
        match self.client.read_item(location, partition_key, id).await {
            Ok(mut item) => {
                self.open(location, &mut item).await?;
                Ok(Some(item))
            }
            Err(e) if e.status_code == status::NOT_FOUND => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_batch(
        &self,
        location: &str,
        partition_key: &str,
        intents: Vec<WriteIntent>,
    ) -> Result<Vec<Result<()>>> {
        let per_batch = (self.config.max_batch_operations / 2).max(1);
        let mut outcomes = Vec::with_capacity(intents.len());
        for chunk in intents.chunks(per_batch) {
            debug!(location, partition_key, items = chunk.len(), "document batch");
            outcomes.extend(self.write_chunk(location, partition_key, chunk).await);
        }
        Ok(outcomes)
    }

    async fn query_page(
        &self,
        location: &str,
        request: &QueryRequest,
        continuation: Option<String>,
    ) -> Result<Page> {
        let query = DocumentQuery {
            partition_key: None,
            filter: NativeFilter::base(&request.type_name),
            spec: request.spec.clone(),
            max_item_count: self.config.page_size,
        };
        let (documents, continuation) = self.fetch(location, &query, continuation).await?;
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
        let query = DocumentQuery {
            partition_key: Some(partition_key.to_string()),
            filter: NativeFilter::Compare {
                path: "relatedId".into(),
                op: CompareOp::Eq,
                value: Value::String(related_id.to_string()),
            },
            spec: QuerySpec::new().order_by("sequence"),
            max_item_count: self.config.page_size,
        };
        let mut events = Vec::new();
        let mut continuation = None;
        loop {
            let (items, next) = self.fetch(location, &query, continuation).await?;
            events.extend(items);
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(events)
    }

    async fn status(&self) -> HealthStatus {
        let status = HealthStatus::healthy()
            .with("backend", BackendKind::Document)
            .with("database", &self.config.database)
            .with("endpoint", &self.config.endpoint);
        match self.client.read_account().await {
            Ok(account) => status
                .with("account", account.id)
                .with("regions", account.readable_regions.join(",")),
            Err(e) => status.with_unhealthy(e.to_string()),
        }
    }
}
