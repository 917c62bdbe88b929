use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use vellum_core::{BackendAdapter, ProviderFactory, Result, StoreConfig, VellumError};

use crate::config::LmdbConfig;
use crate::store::LmdbKvStore;

/// Binds command providers to one LMDB environment
pub struct LmdbProviderFactory {
    config: StoreConfig,
    store: Arc<LmdbKvStore>,
}

impl LmdbProviderFactory {
    pub fn open(config: StoreConfig, lmdb: LmdbConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(LmdbKvStore::open(lmdb)?);
        Ok(Self { config, store })
    }

    pub fn store(&self) -> &Arc<LmdbKvStore> {
        &self.store
    }
}

#[async_trait]
impl ProviderFactory for LmdbProviderFactory {
    async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        let status = self.store.status().await;
        if !status.is_healthy {
            let reason = status.diagnostics.get("error").cloned().unwrap_or_default();
            return Err(VellumError::Unavailable(reason));
        }
        info!(
            locations = ?self.config.locations(),
            path = %self.store.config().path.display(),
            "lmdb provider factory initialized"
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
