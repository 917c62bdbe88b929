use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use vellum_core::{AesGcmCipher, CipherService, Result, VellumError};

/// Resolves the `encryption_secret` reference of a type binding to a cipher
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn CipherService>>;
}

/// Secrets held in process, keyed by reference
///
/// Each secret is stretched into an AES-256-GCM key; ciphers are built once
/// and shared by every provider naming the same reference.
#[derive(Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
    ciphers: RwLock<HashMap<String, Arc<dyn CipherService>>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), secret.into());
        self
    }
}

impl SecretResolver for StaticSecrets {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn CipherService>> {
        if let Some(cipher) = self.ciphers.read().get(reference) {
            return Ok(cipher.clone());
        }
        let secret = self.secrets.get(reference).ok_or_else(|| {
            VellumError::Config(format!("unknown encryption secret reference {reference}"))
        })?;
        let cipher: Arc<dyn CipherService> = Arc::new(AesGcmCipher::from_secret(secret));
        self.ciphers
            .write()
            .insert(reference.to_string(), cipher.clone());
        Ok(cipher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_known_reference_once() {
        let secrets = StaticSecrets::new().with_secret("kv/orders", "s3cret");
        let a = secrets.resolve("kv/orders").unwrap();
        let b = secrets.resolve("kv/orders").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_reference_is_config_error() {
        let secrets = StaticSecrets::new();
        assert!(matches!(
            secrets.resolve("missing"),
            Err(VellumError::Config(_))
        ));
    }
}
