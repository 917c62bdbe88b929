//! Vellum Core: record model and command pipeline for the vellum data layer
//!
//! This crate defines the backend-agnostic parts of a data-access layer that
//! gives one command/query contract over heterogeneous stores:
//! - Record model: versioned, soft-deletable envelope with explicit wire names
//! - Change tracker + event writer: ordered, append-only audit events per save
//! - Encryption pipe: transparent field-level encryption before diff and write
//! - Command provider: validation, optimistic concurrency (ETag CAS) and the
//!   atomic record/event dual-write, batched per partition
//! - Query translator: splits a query into a native push-down filter and an
//!   in-process residual
//!
//! Physical I/O lives behind [`BackendAdapter`]; this crate ships an in-memory
//! reference adapter, the store-specific adapters live in sibling crates.

pub mod cancel;
pub mod command;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event_writer;
pub mod memory;
pub mod observe;
pub mod provider;
pub mod query;
pub mod tracker;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use command::{Command, CommandKind, QueryCommand};
pub use config::{CommandOperations, EventPolicy, Operation, StoreConfig, TypeConfig};
pub use crypto::{AesGcmCipher, CipherService, EncryptionPipe};
pub use error::{ConflictKind, Result, Status, VellumError, Violation};
pub use memory::{InMemoryBackend, InMemoryFactory};
pub use provider::{CommandProvider, RecordStream, SaveReceipt, SaveResult};
pub use query::{field, CompareOp, NativeFilter, Predicate, QueryOp, QuerySpec, Translation};
pub use traits::{
    check_precondition, AccessToken, BackendAdapter, BackendKind, HealthCheck, HealthStatus, Page,
    ProviderFactory, QueryMode, QueryRequest, StaticTokenSource, TokenSource, WriteIntent,
    WriteKind,
};
pub use types::{
    Event, FieldSpec, FieldTable, PropertyChange, Record, RecordMeta, SaveAction, TraceContext,
};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
