//! The command provider: validation, concurrency, diffing, encryption and
//! the batched record/event dual-write for one record type.

use crate::cancel::CancelToken;
use crate::command::{Command, CommandKind, QueryCommand};
use crate::config::{Operation, TypeConfig};
use crate::crypto::{CipherService, EncryptionPipe};
use crate::error::{Result, Status, VellumError, Violation};
use crate::event_writer::EventWriter;
use crate::observe;
use crate::query::{eval, translate, QueryOp, QuerySpec, Translation};
use crate::traits::{BackendAdapter, QueryMode, QueryRequest, WriteIntent, WriteKind};
use crate::tracker;
use crate::types::{
    from_document, timestamp, to_document, wire, Event, PropertyChange, Record, RecordMeta,
    SaveAction,
};
use futures::future::{self, join_all};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lazy stream of query results
pub type RecordStream<R> = BoxStream<'static, Result<R>>;

type DocumentStream = BoxStream<'static, Result<Value>>;

/// What a successful save produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub etag: String,
    /// Sequence number of the written event; also the record's new version
    pub sequence: u64,
    /// `None` when events are disabled for the type
    pub event_id: Option<String>,
}

/// Per-command outcome of [`CommandProvider::save_batch`]
#[derive(Debug, Clone)]
pub struct SaveResult {
    pub id: String,
    pub partition_key: String,
    pub outcome: Result<SaveReceipt>,
}

impl SaveResult {
    pub fn status(&self) -> Status {
        match &self.outcome {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct Inner {
    adapter: Arc<dyn BackendAdapter>,
    binding: TypeConfig,
    pipe: EncryptionPipe,
    events: EventWriter,
}

/// A command's record/event pair, ready to be written
struct Prepared<R> {
    next: R,
    intent: WriteIntent,
    receipt: SaveReceipt,
}

/// Orchestrates commands for record type `R`
///
/// Cheap to clone; clones share the adapter handle.
pub struct CommandProvider<R: Record> {
    inner: Arc<Inner>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for CommandProvider<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> CommandProvider<R> {
    pub fn new(
        adapter: Arc<dyn BackendAdapter>,
        binding: TypeConfig,
        cipher: Option<Arc<dyn CipherService>>,
    ) -> Result<Self> {
        if binding.type_name != R::TYPE_NAME {
            return Err(VellumError::Config(format!(
                "binding for {} used with record type {}",
                binding.type_name,
                R::TYPE_NAME
            )));
        }
        let pipe = EncryptionPipe::new(cipher);
        pipe.check::<R>()?;

        let events = EventWriter::new(&binding);
        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                binding,
                pipe,
                events,
            }),
            _record: PhantomData,
        })
    }

    pub fn binding(&self) -> &TypeConfig {
        &self.inner.binding
    }

    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.inner.adapter
    }

    fn location(&self) -> &str {
        &self.inner.binding.location
    }

    fn require(&self, op: Operation) -> Result<()> {
        self.inner.binding.operations.require(op, R::TYPE_NAME)
    }

    /// Allocate a new record; nothing is written until it is saved
    pub fn create(
        &self,
        id: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Result<Command<R>> {
        self.require(Operation::Create)?;
        let meta = RecordMeta::new(id, partition_key, R::TYPE_NAME);
        Ok(Command::new(CommandKind::Create, R::new(meta)))
    }

    /// Load a live record as an update command
    pub async fn read(
        &self,
        id: &str,
        partition_key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Command<R>>> {
        let record = self.load(id, partition_key, cancel).await?;
        Ok(record.map(|r| Command::new(CommandKind::Update, r)))
    }

    pub async fn update(
        &self,
        id: &str,
        partition_key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Command<R>>> {
        self.require(Operation::Update)?;
        self.read(id, partition_key, cancel).await
    }

    /// Load a live record as a command that soft-deletes it on save
    pub async fn delete(
        &self,
        id: &str,
        partition_key: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Command<R>>> {
        self.require(Operation::Delete)?;
        let record = self.load(id, partition_key, cancel).await?;
        Ok(record.map(|r| Command::new(CommandKind::Delete, r)))
    }

    pub fn query(&self) -> Result<QueryCommand<R>> {
        self.require(Operation::Query)?;
        Ok(QueryCommand::new(self.clone()))
    }

    /// Audit history of one record in sequence order, deleted records included
    pub async fn events(
        &self,
        id: &str,
        partition_key: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>> {
        self.require(Operation::Query)?;
        let documents = cancel
            .run(
                self.inner
                    .adapter
                    .read_events(self.location(), partition_key, id),
            )
            .await?;
        let mut events = documents
            .into_iter()
            .map(|doc| Ok(serde_json::from_value::<Event>(doc)?))
            .collect::<Result<Vec<_>>>()?;
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn load(&self, id: &str, partition_key: &str, cancel: &CancelToken) -> Result<Option<R>> {
        let document = cancel
            .run(self.inner.adapter.read(self.location(), partition_key, id))
            .await?;
        let Some(mut document) = document else {
            return Ok(None);
        };
        self.inner.pipe.decrypt_document::<R>(&mut document).await?;
        let record: R = from_document(document)?;
        if record.meta().is_deleted() || record.meta().type_name != R::TYPE_NAME {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Persist one command; the sole durability boundary
    ///
    /// On success the command carries the new ETag and can be saved again
    /// without a fresh read.
    ///
    /// Cancellation is honoured up to the moment the write is handed to the
    /// store. After that the write runs to completion and its outcome is
    /// returned, so a `Cancelled` error always means nothing was written.
    pub async fn save(&self, command: &mut Command<R>, cancel: &CancelToken) -> Result<SaveReceipt> {
        let started = Instant::now();
        let result = self.save_one(command, cancel).await;
        let status = match &result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        };
        observe::record_save(R::TYPE_NAME, status, started.elapsed());
        result
    }

    async fn save_one(&self, command: &mut Command<R>, cancel: &CancelToken) -> Result<SaveReceipt> {
        cancel.check()?;
        let prepared = self.prepare(command).await?;
        let partition_key = command.partition_key().to_string();

        observe::record_batch(1);
        cancel.check()?;
        let mut outcomes = self
            .inner
            .adapter
            .write_batch(self.location(), &partition_key, vec![prepared.intent.clone()])
            .await?;
        let outcome = if outcomes.len() == 1 {
            outcomes.remove(0)
        } else {
            Err(VellumError::internal(
                "adapter returned the wrong number of outcomes",
                format!("expected 1, got {}", outcomes.len()),
            ))
        };

        match outcome {
            Ok(()) => {
                let receipt = prepared.receipt.clone();
                Self::apply(command, prepared);
                Ok(receipt)
            }
            Err(e) => {
                self.log_failure(command.id(), &e);
                Err(e)
            }
        }
    }

    /// Persist many commands; one native transaction per partition key
    ///
    /// Commands in different partitions are independent. Each command gets
    /// its own outcome, in input order. Cancellation follows `save`: once the
    /// partition writes are dispatched they finish and report real outcomes.
    pub async fn save_batch(
        &self,
        commands: &mut [Command<R>],
        cancel: &CancelToken,
    ) -> Vec<SaveResult> {
        let started = Instant::now();
        let mut outcomes: Vec<Option<Result<SaveReceipt>>> = vec![None; commands.len()];
        let mut prepared: Vec<Option<Prepared<R>>> = Vec::with_capacity(commands.len());
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (index, command) in commands.iter().enumerate() {
            let result = match cancel.check() {
                Ok(()) => self.prepare(command).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(p) => {
                    groups
                        .entry(command.partition_key().to_string())
                        .or_default()
                        .push(index);
                    prepared.push(Some(p));
                }
                Err(e) => {
                    outcomes[index] = Some(Err(e));
                    prepared.push(None);
                }
            }
        }

        if let Err(e) = cancel.check() {
            for index in groups.values().flatten() {
                outcomes[*index] = Some(Err(e.clone()));
            }
            groups.clear();
        }

        let writes = groups.iter().map(|(partition_key, indices)| {
            let intents: Vec<WriteIntent> = indices
                .iter()
                .filter_map(|i| prepared[*i].as_ref().map(|p| p.intent.clone()))
                .collect();
            debug!(
                type_name = R::TYPE_NAME,
                partition_key = %partition_key,
                items = intents.len(),
                "submitting partition batch"
            );
            observe::record_batch(intents.len());
            self.inner
                .adapter
                .write_batch(self.location(), partition_key, intents)
        });
        let results = join_all(writes).await;

        for ((_, indices), result) in groups.iter().zip(results) {
            let per_item: Vec<Result<()>> = match result {
                Ok(items) if items.len() == indices.len() => items,
                Ok(items) => {
                    let e = VellumError::internal(
                        "adapter returned the wrong number of outcomes",
                        format!("expected {}, got {}", indices.len(), items.len()),
                    );
                    vec![Err(e); indices.len()]
                }
                Err(e) => vec![Err(e); indices.len()],
            };
            for (index, item) in indices.iter().zip(per_item) {
                outcomes[*index] = Some(match item {
                    Ok(()) => match prepared[*index].take() {
                        Some(p) => {
                            let receipt = p.receipt.clone();
                            Self::apply(&mut commands[*index], p);
                            Ok(receipt)
                        }
                        None => Err(VellumError::internal("missing prepared write", *index)),
                    },
                    Err(e) => {
                        self.log_failure(commands[*index].id(), &e);
                        Err(e)
                    }
                });
            }
        }

        let elapsed = started.elapsed();
        commands
            .iter()
            .zip(outcomes)
            .map(|(command, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Err(VellumError::internal("command was not submitted", command.id()))
                });
                let status = match &outcome {
                    Ok(_) => Status::Ok,
                    Err(e) => e.status(),
                };
                observe::record_save(R::TYPE_NAME, status, elapsed);
                SaveResult {
                    id: command.id().to_string(),
                    partition_key: command.partition_key().to_string(),
                    outcome,
                }
            })
            .collect()
    }

    fn log_failure(&self, id: &str, error: &VellumError) {
        match error {
            VellumError::Conflict { kind, .. } => {
                warn!(type_name = R::TYPE_NAME, id, %kind, "save rejected by precondition")
            }
            e if e.is_retryable() => {
                warn!(type_name = R::TYPE_NAME, id, error = %e, "save throttled")
            }
            e => debug!(type_name = R::TYPE_NAME, id, error = %e, "save failed"),
        }
    }

    fn validate(command: &Command<R>) -> Result<()> {
        let mut violations = Vec::new();
        let meta = command.record.meta();
        meta.validate(R::TYPE_NAME, &mut violations);

        let original = command.original.meta();
        if meta.id != original.id {
            violations.push(Violation::new(wire::ID, "cannot change after allocation"));
        }
        if meta.partition_key != original.partition_key {
            violations.push(Violation::new(
                wire::PARTITION_KEY,
                "cannot change after allocation",
            ));
        }
        command.record.validate(&mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(VellumError::ValidationFailed(violations))
        }
    }

    /// Validate, diff and encrypt a command into its write intent
    async fn prepare(&self, command: &Command<R>) -> Result<Prepared<R>> {
        self.require(command.kind.operation())?;

        if command.kind != CommandKind::Create && command.original.meta().is_deleted() {
            return Err(VellumError::NotFound(format!(
                "record {} is deleted",
                command.id()
            )));
        }

        Self::validate(command)?;

        let original = command.original.meta();
        let now = timestamp::now();
        let mut next = command.record.clone();
        {
            let meta = next.meta_mut();
            meta.type_name = R::TYPE_NAME.to_string();
            meta.etag = Some(Uuid::new_v4().to_string());
            meta.version = original.version + 1;
            meta.updated_at = now;
            meta.created_at = match command.kind {
                CommandKind::Create => now,
                _ => original.created_at,
            };
            meta.is_deleted = match command.kind {
                CommandKind::Delete => Some(true),
                _ => original.is_deleted,
            };
        }

        let (action, kind) = match command.kind {
            CommandKind::Create => (SaveAction::Created, WriteKind::Create),
            CommandKind::Update => (SaveAction::Updated, WriteKind::Update),
            CommandKind::Delete => (SaveAction::Deleted, WriteKind::Delete),
        };

        let event = if self.inner.events.enabled() {
            let changes = match action {
                SaveAction::Deleted => None,
                _ => Some(self.changes(&command.original, &next).await?),
            };
            self.inner
                .events
                .build(next.meta(), action, changes, &command.trace)
        } else {
            None
        };

        let mut record = to_document(&next)?;
        self.inner.pipe.encrypt_document::<R>(&mut record).await?;

        let meta = next.meta();
        let receipt = SaveReceipt {
            etag: meta.etag.clone().unwrap_or_default(),
            sequence: meta.version,
            event_id: event.as_ref().map(|e| e.id.clone()),
        };
        let intent = WriteIntent {
            id: meta.id.clone(),
            kind,
            expected_etag: original.etag.clone(),
            record,
            event: event.map(serde_json::to_value).transpose()?,
        };

        Ok(Prepared {
            next,
            intent,
            receipt,
        })
    }

    /// Plaintext diff, with encrypted fields rendered in stored form
    async fn changes(&self, before: &R, after: &R) -> Result<Vec<PropertyChange>> {
        let diff = tracker::diff(before, after, self.inner.binding.event_policy);
        let mut changes = Vec::with_capacity(diff.len());
        for change in diff {
            let (old_value, new_value) = if change.encrypted {
                let pipe = &self.inner.pipe;
                (
                    pipe.encrypt_value(change.field, &change.old_value).await?,
                    pipe.encrypt_value(change.field, &change.new_value).await?,
                )
            } else {
                (change.old_value, change.new_value)
            };
            changes.push(PropertyChange {
                property_path: change.field.to_string(),
                old_value,
                new_value,
            });
        }
        Ok(changes)
    }

    fn apply(command: &mut Command<R>, prepared: Prepared<R>) {
        command.record = prepared.next.clone();
        command.original = prepared.next;
        if command.kind == CommandKind::Create {
            command.kind = CommandKind::Update;
        }
    }

    pub(crate) fn translate(&self, spec: &QuerySpec) -> Result<Translation> {
        translate(spec, R::TYPE_NAME, R::fields().catalog())
    }

    /// Build the lazy result stream for a query
    pub(crate) fn execute(&self, spec: QuerySpec, cancel: CancelToken) -> Result<RecordStream<R>> {
        self.require(Operation::Query)?;
        cancel.check()?;
        let translation = self.translate(&spec)?;

        let adapter = self.inner.adapter.clone();
        let residual = match adapter.query_mode() {
            QueryMode::Pushdown => translation.residual,
            QueryMode::Native => Vec::new(),
        };
        debug!(
            type_name = R::TYPE_NAME,
            residual_ops = residual.len(),
            "executing query"
        );

        let request = Arc::new(QueryRequest {
            type_name: R::TYPE_NAME.to_string(),
            native: translation.native,
            spec: translation.spec,
        });
        let location: Arc<str> = Arc::from(self.location());

        let pages = stream::unfold(Some(None::<String>), move |state| {
            let adapter = adapter.clone();
            let request = request.clone();
            let location = location.clone();
            let cancel = cancel.clone();
            async move {
                let continuation = state?;
                match cancel
                    .run(adapter.query_page(&location, &request, continuation))
                    .await
                {
                    Ok(page) => {
                        observe::record_query_page(R::TYPE_NAME, page.documents.len());
                        let next = page.continuation.map(Some);
                        Some((Ok(page.documents), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        });
        let documents: DocumentStream = pages
            .map_ok(|docs| stream::iter(docs.into_iter().map(Ok::<Value, VellumError>)))
            .try_flatten()
            .boxed();

        let pipe = self.inner.pipe.clone();
        let records = replay(documents, residual)
            .and_then(move |mut document| {
                let pipe = pipe.clone();
                async move {
                    pipe.decrypt_document::<R>(&mut document).await?;
                    from_document::<R>(document)
                }
            })
            .boxed();
        Ok(records)
    }
}

/// Apply residual operators to a document stream in order
fn replay(mut documents: DocumentStream, ops: Vec<QueryOp>) -> DocumentStream {
    for op in ops {
        documents = match op {
            QueryOp::Where(predicate) => documents
                .try_filter(move |doc| future::ready(eval::eval_predicate(&predicate, doc)))
                .boxed(),
            QueryOp::Skip(count) => {
                let mut seen = 0usize;
                documents
                    .try_filter(move |_| {
                        seen += 1;
                        future::ready(seen > count)
                    })
                    .boxed()
            }
            QueryOp::Take(count) => stream::unfold((documents, count), |(mut inner, left)| async move {
                if left == 0 {
                    return None;
                }
                let item = inner.next().await?;
                let left = if item.is_ok() { left - 1 } else { 0 };
                Some((item, (inner, left)))
            })
            .boxed(),
            QueryOp::OrderBy { field, descending } => stream::once(async move {
                let sorted: DocumentStream = match documents.try_collect::<Vec<Value>>().await {
                    Ok(mut docs) => {
                        eval::sort_documents(&mut docs, &field, descending);
                        stream::iter(docs.into_iter().map(Ok)).boxed()
                    }
                    Err(e) => stream::iter(vec![Err(e)]).boxed(),
                };
                sorted
            })
            .flatten()
            .boxed(),
        };
    }
    documents
}

impl<R: Record> std::fmt::Debug for CommandProvider<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProvider")
            .field("type", &R::TYPE_NAME)
            .field("location", &self.inner.binding.location)
            .field("backend", &self.inner.adapter.kind())
            .finish()
    }
}
