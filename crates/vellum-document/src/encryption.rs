//! Container-level encryption
//!
//! Independent of the record-level encryption pipe: a container policy names
//! top-level paths that are sealed on the way to the service and opened on
//! the way back, under a data key that is stored wrapped and unwrapped once
//! through a [`KeyWrapProvider`] when the adapter is built.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use vellum_core::{AesGcmCipher, EncryptionPipe, Result, VellumError};

const WRAP_NONCE_LEN: usize = 12;

/// Encrypted paths of one container and its wrapped data key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEncryptionPolicy {
    pub paths: Vec<String>,
    /// Base64 of the data key as returned by the key-wrap service
    pub wrapped_key: String,
}

impl ContainerEncryptionPolicy {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>, wrapped_key: &[u8]) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            wrapped_key: BASE64.encode(wrapped_key),
        }
    }

    fn wrapped_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.wrapped_key)
            .map_err(|e| VellumError::Config(format!("invalid wrapped key: {e}")))
    }
}

/// External service that unwraps data encryption keys
#[async_trait]
pub trait KeyWrapProvider: Send + Sync {
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<[u8; 32]>;
}

/// Wraps data keys under a local AES-256-GCM master key
///
/// Wrapped form is `nonce || ciphertext` with a random nonce.
pub struct LocalKeyWrapProvider {
    master_key: [u8; 32],
}

impl LocalKeyWrapProvider {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn master(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.master_key)
            .map_err(|e| VellumError::Config(format!("invalid master key: {e}")))
    }

    pub fn wrap_key(&self, key: &[u8; 32]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; WRAP_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .master()?
            .encrypt(Nonce::from_slice(&nonce), key.as_slice())
            .map_err(|e| VellumError::internal("key wrap failed", e))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Fresh data key, returned wrapped
    pub fn generate_wrapped_key(&self) -> Result<Vec<u8>> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        self.wrap_key(&key)
    }
}

#[async_trait]
impl KeyWrapProvider for LocalKeyWrapProvider {
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<[u8; 32]> {
        if wrapped.len() <= WRAP_NONCE_LEN {
            return Err(VellumError::Forbidden("wrapped key is truncated".into()));
        }
        let plain = self
            .master()?
            .decrypt(
                Nonce::from_slice(&wrapped[..WRAP_NONCE_LEN]),
                &wrapped[WRAP_NONCE_LEN..],
            )
            .map_err(|_| VellumError::Forbidden("data key cannot be unwrapped".into()))?;
        plain
            .try_into()
            .map_err(|_| VellumError::Config("unwrapped data key is not 32 bytes".into()))
    }
}

/// Resolved policy: seals and opens the listed paths of stored items
#[derive(Clone)]
pub struct ContainerCipher {
    paths: Vec<String>,
    pipe: EncryptionPipe,
}

impl ContainerCipher {
    pub async fn resolve(
        policy: &ContainerEncryptionPolicy,
        provider: &dyn KeyWrapProvider,
    ) -> Result<Self> {
        let key = provider.unwrap_key(&policy.wrapped_bytes()?).await?;
        Ok(Self {
            paths: policy.paths.clone(),
            pipe: EncryptionPipe::new(Some(Arc::new(AesGcmCipher::new(key)))),
        })
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub async fn seal(&self, item: &mut Value) -> Result<()> {
        self.transform(item, true).await
    }

    pub async fn open(&self, item: &mut Value) -> Result<()> {
        self.transform(item, false).await
    }

    async fn transform(&self, item: &mut Value, seal: bool) -> Result<()> {
        let Some(object) = item.as_object_mut() else {
            return Ok(());
        };
        for path in &self.paths {
            if let Some(slot) = object.get_mut(path) {
                *slot = if seal {
                    self.pipe.encrypt_value(path, slot).await?
                } else {
                    self.pipe.decrypt_value(path, slot).await?
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_policy_round_trip() {
        let provider = LocalKeyWrapProvider::new([7u8; 32]);
        let policy =
            ContainerEncryptionPolicy::new(["ssn"], &provider.generate_wrapped_key().unwrap());
        let cipher = ContainerCipher::resolve(&policy, &provider).await.unwrap();

        let mut item = json!({"id": "a", "ssn": "123-45-6789", "name": "ada"});
        cipher.seal(&mut item).await.unwrap();
        assert_ne!(item["ssn"], "123-45-6789");
        assert_eq!(item["name"], "ada");

        cipher.open(&mut item).await.unwrap();
        assert_eq!(item["ssn"], "123-45-6789");
    }

    #[tokio::test]
    async fn test_wrong_master_key_is_forbidden() {
        let provider = LocalKeyWrapProvider::new([7u8; 32]);
        let policy =
            ContainerEncryptionPolicy::new(["ssn"], &provider.generate_wrapped_key().unwrap());
        let other = LocalKeyWrapProvider::new([8u8; 32]);
        let err = ContainerCipher::resolve(&policy, &other).await.err().unwrap();
        assert_eq!(err.status().code(), 403);
    }
}
