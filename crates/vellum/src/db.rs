use std::sync::Arc;
use tracing::info;
use vellum_core::{
    BackendAdapter, BackendKind, CipherService, CommandProvider, HealthStatus, InMemoryFactory,
    ProviderFactory, Record, Result, StoreConfig, TokenSource,
};
use vellum_document::{DocumentClient, DocumentConfig, DocumentProviderFactory, KeyWrapProvider};
use vellum_lmdb::{LmdbConfig, LmdbProviderFactory};
use vellum_sqlite::{SqliteConfig, SqliteProviderFactory};

use crate::secrets::SecretResolver;

/// Initialized store plus the ciphers providers are built with
///
/// Every constructor runs the factory's start-up checks before returning, so
/// a `Vellum` always points at a reachable store with its locations in place.
pub struct Vellum {
    factory: Arc<dyn ProviderFactory>,
    cipher: Option<Arc<dyn CipherService>>,
    secrets: Option<Arc<dyn SecretResolver>>,
}

impl Vellum {
    /// Initialize `factory` and wrap it
    pub async fn from_factory<F>(factory: F) -> Result<Self>
    where
        F: ProviderFactory + 'static,
    {
        factory.initialize().await?;
        let factory: Arc<dyn ProviderFactory> = Arc::new(factory);
        info!(
            backend = %factory.adapter().kind(),
            types = factory.config().types.len(),
            "vellum store ready"
        );
        Ok(Self {
            factory,
            cipher: None,
            secrets: None,
        })
    }

    pub async fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::from_factory(InMemoryFactory::new(config)?).await
    }

    pub async fn open_lmdb(config: StoreConfig, lmdb: LmdbConfig) -> Result<Self> {
        Self::from_factory(LmdbProviderFactory::open(config, lmdb)?).await
    }

    pub async fn open_sqlite(
        config: StoreConfig,
        sqlite: SqliteConfig,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self> {
        Self::from_factory(SqliteProviderFactory::new(config, sqlite, tokens)?).await
    }

    pub async fn connect_document(
        config: StoreConfig,
        document: DocumentConfig,
        client: Arc<dyn DocumentClient>,
        key_wrap: Option<Arc<dyn KeyWrapProvider>>,
    ) -> Result<Self> {
        Self::from_factory(
            DocumentProviderFactory::connect(config, document, client, key_wrap).await?,
        )
        .await
    }

    /// Cipher used by every provider whose binding names no secret
    pub fn with_cipher(mut self, cipher: Arc<dyn CipherService>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Resolver for the `encryption_secret` references of type bindings
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        self.factory.config()
    }

    pub fn kind(&self) -> BackendKind {
        self.factory.adapter().kind()
    }

    pub fn adapter(&self) -> Arc<dyn BackendAdapter> {
        self.factory.adapter()
    }

    /// Command provider for `R`
    ///
    /// A binding that names an encryption secret gets the cipher resolved
    /// from it; otherwise the store-wide cipher, if any, is used.
    pub fn provider<R: Record>(&self) -> Result<CommandProvider<R>> {
        let binding = self.config().binding(R::TYPE_NAME)?.clone();
        let cipher = match (&binding.encryption_secret, &self.secrets) {
            (Some(reference), Some(secrets)) => Some(secrets.resolve(reference)?),
            _ => self.cipher.clone(),
        };
        CommandProvider::new(self.factory.adapter(), binding, cipher)
    }

    pub async fn get_status(&self) -> HealthStatus {
        self.factory.get_status().await
    }
}

impl std::fmt::Debug for Vellum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vellum")
            .field("backend", &self.kind())
            .field("types", &self.config().types.len())
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}
