//! LMDB key-value adapter for Vellum
//!
//! Stores records and their audit events in one LMDB environment:
//! - Conditional per-partition write transactions (not-exists for creates,
//!   ETag match for updates and deletes, not-exists for event keys)
//! - Per-item cancellation reasons; items cancelled only because a sibling
//!   failed are resubmitted and commit independently
//! - Ordered location/partition/id keys with exclusive-start-key paging
//! - Event expiry, hidden on read and removed by `purge_expired_events`
//! - Blocking engine calls run on tokio's blocking pool

pub mod config;
pub mod factory;
pub mod keys;
pub mod store;
pub mod txn;

pub use config::{LmdbConfig, SyncMode};
pub use factory::LmdbProviderFactory;
pub use store::LmdbKvStore;
pub use txn::map_lmdb_error;
