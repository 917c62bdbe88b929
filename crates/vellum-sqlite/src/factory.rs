use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use vellum_core::{BackendAdapter, ProviderFactory, Result, StoreConfig, TokenSource, VellumError};

use crate::config::SqliteConfig;
use crate::schema::check_location;
use crate::store::SqliteStore;

/// Binds command providers to one SQLite database file
pub struct SqliteProviderFactory {
    config: StoreConfig,
    store: Arc<SqliteStore>,
}

impl SqliteProviderFactory {
    pub fn new(
        config: StoreConfig,
        sqlite: SqliteConfig,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self> {
        config.validate()?;
        for location in config.locations() {
            check_location(location)?;
        }
        Ok(Self {
            config,
            store: Arc::new(SqliteStore::new(sqlite, tokens)?),
        })
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }
}

#[async_trait]
impl ProviderFactory for SqliteProviderFactory {
    async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        let locations: Vec<String> = self
            .config
            .locations()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.store.create_tables(locations.clone()).await?;
        self.store.verify_tables(locations.clone()).await?;

        let status = self.store.status().await;
        if !status.is_healthy {
            let reason = status.diagnostics.get("error").cloned().unwrap_or_default();
            return Err(VellumError::Unavailable(reason));
        }
        info!(
            ?locations,
            path = %self.store.config().path.display(),
            "sqlite provider factory initialized"
        );
        Ok(())
    }

    fn adapter(&self) -> Arc<dyn BackendAdapter> {
        self.store.clone()
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }
}
