//! Field-level encryption
//!
//! Flagged fields are stored as `enc:v1:<base64(nonce || ciphertext)>` where
//! the plaintext is the field's JSON serialization. Null values are left as
//! null so absent fields stay absent.
//!
//! [`AesGcmCipher`] derives its nonce from the key, the field path and the
//! plaintext. The same value therefore always encrypts to the same string,
//! which keeps event diffs stable across re-saves. Equal plaintexts in the
//! same field are observable as equal ciphertexts.

use crate::error::{Result, VellumError};
use crate::types::Record;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

/// Pluggable symmetric cipher used by the encryption pipe
#[async_trait]
pub trait CipherService: Send + Sync {
    /// Encrypt `plaintext` belonging to the field at `path`
    async fn encrypt(&self, path: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`CipherService::encrypt`]
    async fn decrypt(&self, path: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM with deterministic, content-derived nonces
#[derive(Clone)]
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive a key from a resolved secret string
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"vellum-field-key");
        hasher.update(secret.as_bytes());
        Self::new(hasher.finalize().into())
    }

    /// Fresh random key, mostly for tests
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    fn nonce_for(&self, path: &str, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| VellumError::Config(format!("invalid encryption key: {e}")))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

#[async_trait]
impl CipherService for AesGcmCipher {
    async fn encrypt(&self, path: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.nonce_for(path, plaintext);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| VellumError::internal("field encryption failed", e))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt(&self, path: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(VellumError::Serialization(format!(
                "encrypted value for {path} is too short"
            )));
        }
        self.cipher()?
            .decrypt(Nonce::from_slice(&ciphertext[..NONCE_LEN]), &ciphertext[NONCE_LEN..])
            .map_err(|e| VellumError::internal(format!("field decryption failed for {path}"), e))
    }
}

/// Applies a cipher to the encrypted fields of a record type
#[derive(Clone, Default)]
pub struct EncryptionPipe {
    cipher: Option<Arc<dyn CipherService>>,
}

impl EncryptionPipe {
    pub fn new(cipher: Option<Arc<dyn CipherService>>) -> Self {
        Self { cipher }
    }

    /// Fail when `R` declares encrypted fields but no cipher is available
    pub fn check<R: Record>(&self) -> Result<()> {
        if self.cipher.is_none() && R::fields().has_encrypted() {
            return Err(VellumError::Config(format!(
                "{} declares encrypted fields but no cipher is configured",
                R::TYPE_NAME
            )));
        }
        Ok(())
    }

    fn require_cipher(&self) -> Result<&Arc<dyn CipherService>> {
        self.cipher
            .as_ref()
            .ok_or_else(|| VellumError::Config("no cipher configured".into()))
    }

    pub async fn encrypt_value(&self, path: &str, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let plaintext = serde_json::to_vec(value)?;
        let sealed = self.require_cipher()?.encrypt(path, &plaintext).await?;
        Ok(Value::String(format!(
            "{ENVELOPE_PREFIX}{}",
            BASE64.encode(sealed)
        )))
    }

    pub async fn decrypt_value(&self, path: &str, value: &Value) -> Result<Value> {
        let encoded = match value {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => s.strip_prefix(ENVELOPE_PREFIX).ok_or_else(|| {
                VellumError::Serialization(format!("{path} is not in encrypted form"))
            })?,
            _ => {
                return Err(VellumError::Serialization(format!(
                    "{path} is not in encrypted form"
                )))
            }
        };
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| VellumError::Serialization(format!("{path}: {e}")))?;
        let plaintext = self.require_cipher()?.decrypt(path, &sealed).await?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Replace every encrypted field of a stored document with ciphertext
    pub async fn encrypt_document<R: Record>(&self, document: &mut Value) -> Result<()> {
        self.transform_document::<R>(document, true).await
    }

    /// Restore plaintext for every encrypted field of a stored document
    pub async fn decrypt_document<R: Record>(&self, document: &mut Value) -> Result<()> {
        self.transform_document::<R>(document, false).await
    }

    async fn transform_document<R: Record>(&self, document: &mut Value, seal: bool) -> Result<()> {
        let Some(object) = document.as_object_mut() else {
            return Err(VellumError::Serialization(format!(
                "{} document is not an object",
                R::TYPE_NAME
            )));
        };
        for spec in R::fields().encrypted() {
            let Some(slot) = object.get_mut(spec.name) else {
                continue;
            };
            *slot = if seal {
                self.encrypt_value(spec.name, slot).await?
            } else {
                self.decrypt_value(spec.name, slot).await?
            };
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptionPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionPipe")
            .field("enabled", &self.cipher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipe() -> EncryptionPipe {
        EncryptionPipe::new(Some(Arc::new(AesGcmCipher::from_secret("s3cret"))))
    }

    #[tokio::test]
    async fn test_value_round_trip() {
        let pipe = pipe();
        for value in [json!("private"), json!(42), json!({"a": [1, 2]})] {
            let sealed = pipe.encrypt_value("privateField", &value).await.unwrap();
            assert!(sealed.as_str().unwrap().starts_with(ENVELOPE_PREFIX));
            let opened = pipe.decrypt_value("privateField", &sealed).await.unwrap();
            assert_eq!(opened, value);
        }
    }

    #[tokio::test]
    async fn test_encryption_is_deterministic_per_path() {
        let pipe = pipe();
        let a = pipe.encrypt_value("f", &json!("x")).await.unwrap();
        let b = pipe.encrypt_value("f", &json!("x")).await.unwrap();
        let c = pipe.encrypt_value("g", &json!("x")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_null_passes_through() {
        let pipe = EncryptionPipe::default();
        assert_eq!(pipe.encrypt_value("f", &Value::Null).await.unwrap(), Value::Null);
        assert!(pipe.encrypt_value("f", &json!("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let sealed = pipe().encrypt_value("f", &json!("x")).await.unwrap();
        let other = EncryptionPipe::new(Some(Arc::new(AesGcmCipher::generate())));
        assert!(other.decrypt_value("f", &sealed).await.is_err());
        assert!(other.decrypt_value("f", &json!("plain")).await.is_err());
    }
}
