//! Vellum Prelude
//!
//! ```
//! use vellum::prelude::*;
//! ```

// Entry points
pub use crate::{Vellum, Result, VellumError};

// Records and commands
pub use crate::{
    field, CancelToken, Command, CommandProvider, Event, FieldTable, Predicate, Record,
    RecordMeta, SaveAction, SaveReceipt, SaveResult, TraceContext,
};

// Configs
pub use crate::{
    CommandOperations, DocumentConfig, EventPolicy, LmdbConfig, SqliteConfig, StoreConfig,
    TypeConfig,
};

// Traits
pub use crate::{BackendAdapter, CipherService, ProviderFactory, SecretResolver, TokenSource};

// Implementations
pub use crate::{AesGcmCipher, StaticSecrets, StaticTokenSource};
