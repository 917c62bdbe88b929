use crate::config::StoreConfig;
use crate::crypto::CipherService;
use crate::error::Result;
use crate::provider::CommandProvider;
use crate::traits::backend::BackendAdapter;
use crate::traits::health::HealthStatus;
use crate::types::Record;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-backend entry point: validates the store and binds providers to it
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Check connectivity and schema for every configured location
    ///
    /// Called once at start-up; stores that need tables or containers create
    /// them here.
    async fn initialize(&self) -> Result<()>;

    fn adapter(&self) -> Arc<dyn BackendAdapter>;

    fn config(&self) -> &StoreConfig;

    async fn get_status(&self) -> HealthStatus {
        self.adapter().status().await
    }

    /// Command provider for `R`, bound to its configured location
    fn provider<R: Record>(&self, cipher: Option<Arc<dyn CipherService>>) -> Result<CommandProvider<R>>
    where
        Self: Sized,
    {
        let binding = self.config().binding(R::TYPE_NAME)?.clone();
        CommandProvider::new(self.adapter(), binding, cipher)
    }
}
