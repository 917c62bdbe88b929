//! Document database adapter for Vellum
//!
//! Maps the command contract onto a globally-distributed document service:
//! - Record and event written in one transactional batch per partition,
//!   operations interleaved positionally
//! - Queries delegated in full to the service's native query engine
//! - Container-level encryption of listed paths under a wrapped data key,
//!   separate from record-level field encryption
//! - Native `ttl` on events
//!
//! The transport is the [`DocumentClient`] trait; [`InMemoryDocumentClient`]
//! emulates the service in process.

pub mod adapter;
pub mod client;
pub mod config;
pub mod emulator;
pub mod encryption;
pub mod factory;

pub use adapter::DocumentAdapter;
pub use client::{
    map_status, AccountProperties, BatchOperation, BatchResponse, ClientError, DocumentClient,
    DocumentQuery, OperationResult, QueryResponse,
};
pub use config::DocumentConfig;
pub use emulator::InMemoryDocumentClient;
pub use encryption::{
    ContainerCipher, ContainerEncryptionPolicy, KeyWrapProvider, LocalKeyWrapProvider,
};
pub use factory::DocumentProviderFactory;
