//! Vellum: one command/query contract over heterogeneous stores
//!
//! Vellum gives application code a single way to create, read, update,
//! soft-delete and query records, whichever store holds them:
//! - **Commands**: ETag-guarded saves that write the record and its audit
//!   event atomically, batched per partition
//! - **Audit log**: ordered `EVENT^{id}^{sequence}` events with property-level
//!   diffs, optional retention
//! - **Field encryption**: flagged fields are encrypted before diffing, so
//!   plaintext never reaches the store or the log
//! - **Queries**: filters pushed down to the store where it can evaluate them,
//!   the rest applied in process
//!
//! Backends: LMDB (key-value), a document service, SQLite (relational) and an
//! in-memory reference store.
//!
//! # Quick Start
//!
//! ```no_run
//! use vellum::prelude::*;
//!
//! # async fn run<R: Record>() -> Result<()> {
//! let config = StoreConfig::new().with_type(TypeConfig::new(R::TYPE_NAME, "records"));
//! let store = Vellum::open_sqlite(config, SqliteConfig::new("./data/vellum.db"), None).await?;
//! let records = store.provider::<R>()?;
//!
//! let cancel = CancelToken::new();
//! let mut create = records.create("id-1", "tenant-a")?;
//! records.save(&mut create, &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod prelude;
pub mod secrets;

pub use vellum_core::{
    field,
    query::{eval, NativeFilter, QueryOp, QuerySpec, Translation},
    AccessToken, AesGcmCipher, BackendAdapter, BackendKind, CancelToken, CipherService, Command,
    CommandKind, CommandOperations, CommandProvider, CompareOp, ConflictKind, Event, EventPolicy,
    FieldSpec, FieldTable, HealthStatus, InMemoryBackend, InMemoryFactory, Operation, Page,
    Predicate, PropertyChange, ProviderFactory, QueryCommand, QueryMode, Record, RecordMeta,
    RecordStream, Result, SaveAction, SaveReceipt, SaveResult, StaticTokenSource, Status,
    StoreConfig, TokenSource, TraceContext, TypeConfig, VellumError, Violation,
};

pub use vellum_document::{
    ContainerEncryptionPolicy, DocumentClient, DocumentConfig, DocumentProviderFactory,
    InMemoryDocumentClient, KeyWrapProvider, LocalKeyWrapProvider,
};
pub use vellum_lmdb::{LmdbConfig, LmdbKvStore, LmdbProviderFactory, SyncMode};
pub use vellum_sqlite::{SqliteConfig, SqliteProviderFactory, SqliteStore, SynchronousMode};

pub use db::Vellum;
pub use secrets::{SecretResolver, StaticSecrets};
