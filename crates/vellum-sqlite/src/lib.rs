//! SQLite relational adapter for Vellum
//!
//! Each location gets a records table and an events table. Writes for one
//! partition run in a single immediate transaction with a savepoint per
//! item, so a rejected item rolls back alone. Creates use
//! `ON CONFLICT DO NOTHING`; updates and deletes are guarded by
//! `etag = ? AND is_deleted = 0`.
//!
//! Query filters are rendered to `json_extract` conditions over the stored
//! body. Every operation opens its own connection, minting a fresh access
//! token first when a [`vellum_core::TokenSource`] is configured.

pub mod config;
pub mod error;
pub mod factory;
pub mod filter;
pub mod schema;
pub mod store;

pub use config::{SqliteConfig, SynchronousMode};
pub use error::map_sqlite_error;
pub use factory::SqliteProviderFactory;
pub use filter::{render, SqlFilter};
pub use store::SqliteStore;
