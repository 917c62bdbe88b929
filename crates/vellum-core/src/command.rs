//! Units of work handed out by a [`CommandProvider`]
//!
//! A command holds the record the caller mutates plus the pre-image it was
//! loaded with. Nothing touches the store until it is saved.

use crate::config::Operation;
use crate::error::Result;
use crate::provider::{CommandProvider, RecordStream};
use crate::query::{Predicate, QuerySpec, Translation};
use crate::types::{Record, TraceContext};
use crate::CancelToken;
use futures::TryStreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Update,
    Delete,
}

impl CommandKind {
    pub fn operation(self) -> Operation {
        match self {
            CommandKind::Create => Operation::Create,
            CommandKind::Update => Operation::Update,
            CommandKind::Delete => Operation::Delete,
        }
    }
}

/// Create, update or delete handle for one record
#[derive(Debug, Clone)]
pub struct Command<R: Record> {
    pub(crate) kind: CommandKind,
    pub(crate) record: R,
    pub(crate) original: R,
    pub(crate) trace: TraceContext,
}

impl<R: Record> Command<R> {
    pub(crate) fn new(kind: CommandKind, record: R) -> Self {
        Self {
            kind,
            original: record.clone(),
            record,
            trace: TraceContext::default(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    /// Mutable access to the record; changes are diffed on save
    pub fn record_mut(&mut self) -> &mut R {
        &mut self.record
    }

    /// State as last read from or written to the store
    pub fn original(&self) -> &R {
        &self.original
    }

    pub fn id(&self) -> &str {
        &self.original.meta().id
    }

    pub fn partition_key(&self) -> &str {
        &self.original.meta().partition_key
    }

    /// Current version token; `None` until the first successful save
    pub fn etag(&self) -> Option<&str> {
        self.original.meta().etag.as_deref()
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Trace identifiers copied into the event of the next save
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    pub fn set_trace(&mut self, trace: TraceContext) {
        self.trace = trace;
    }
}

/// Deferred query over one record type
///
/// Building the query does no I/O. [`QueryCommand::stream`] checks and
/// translates it and returns a lazy, single-pass stream that fetches pages as
/// it is polled.
#[derive(Clone)]
pub struct QueryCommand<R: Record> {
    provider: CommandProvider<R>,
    spec: QuerySpec,
}

impl<R: Record> QueryCommand<R> {
    pub(crate) fn new(provider: CommandProvider<R>) -> Self {
        Self {
            provider,
            spec: QuerySpec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.spec = self.spec.filter(predicate);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.spec = self.spec.order_by(field);
        self
    }

    pub fn order_by_descending(mut self, field: impl Into<String>) -> Self {
        self.spec = self.spec.order_by_descending(field);
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.spec = self.spec.skip(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.spec = self.spec.take(count);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Native/residual split the store will receive
    pub fn translate(&self) -> Result<Translation> {
        self.provider.translate(&self.spec)
    }

    pub fn stream(self, cancel: &CancelToken) -> Result<RecordStream<R>> {
        self.provider.execute(self.spec, cancel.clone())
    }

    /// Drain the stream into memory
    pub async fn to_vec(self, cancel: &CancelToken) -> Result<Vec<R>> {
        self.stream(cancel)?.try_collect().await
    }
}

impl<R: Record> std::fmt::Debug for QueryCommand<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCommand")
            .field("type", &R::TYPE_NAME)
            .field("spec", &self.spec)
            .finish()
    }
}
