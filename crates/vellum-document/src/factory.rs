use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use vellum_core::{BackendAdapter, ProviderFactory, Result, StoreConfig, VellumError};

use crate::adapter::DocumentAdapter;
use crate::client::DocumentClient;
use crate::config::DocumentConfig;
use crate::encryption::{ContainerCipher, KeyWrapProvider};

/// Binds command providers to containers of one document database
pub struct DocumentProviderFactory {
    config: StoreConfig,
    client: Arc<dyn DocumentClient>,
    adapter: Arc<DocumentAdapter>,
}

impl DocumentProviderFactory {
    /// Resolve container encryption policies and build the adapter
    ///
    /// Every policy's data key is unwrapped here, once. A policy without a
    /// key-wrap provider is a configuration error.
    pub async fn connect(
        config: StoreConfig,
        document: DocumentConfig,
        client: Arc<dyn DocumentClient>,
        key_wrap: Option<Arc<dyn KeyWrapProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        let mut ciphers = HashMap::new();
        for (container, policy) in &document.encryption {
            let provider = key_wrap.as_deref().ok_or_else(|| {
                VellumError::Config(format!(
                    "container {container} is encrypted but no key-wrap provider is configured"
                ))
            })?;
            ciphers.insert(
                container.clone(),
                ContainerCipher::resolve(policy, provider).await?,
            );
        }
        let adapter = Arc::new(DocumentAdapter::new(client.clone(), document, ciphers));
        Ok(Self {
            config,
            client,
            adapter,
        })
    }

    pub fn document_adapter(&self) -> &Arc<DocumentAdapter> {
        &self.adapter
    }
}

#[async_trait]
impl ProviderFactory for DocumentProviderFactory {
    async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        let account = self.client.read_account().await?;
        for location in self.config.locations() {
            self.client.create_container_if_not_exists(location).await?;
        }
        info!(
            account = %account.id,
            database = %self.adapter.config().database,
            containers = ?self.config.locations(),
            "document provider factory initialized"
        );
        Ok(())
    }

    fn adapter(&self) -> Arc<dyn BackendAdapter> {
        self.adapter.clone()
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }
}
