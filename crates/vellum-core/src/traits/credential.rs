use crate::error::{Result, VellumError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Short-lived bearer credential for a physical connection
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Reject an expired token before it is presented to the store
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_expired(Utc::now()) {
            Err(VellumError::Forbidden("access token expired".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Opaque issuer of access tokens; called once per physical connection
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<AccessToken>;
}

/// Mints `<prefix>-<n>` tokens with a fixed lifetime
///
/// Useful for local stores and tests; counts how many tokens were issued.
pub struct StaticTokenSource {
    prefix: String,
    lifetime: Duration,
    minted: AtomicU64,
}

impl StaticTokenSource {
    pub fn new(prefix: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            lifetime,
            minted: AtomicU64::new(0),
        }
    }

    pub fn minted(&self) -> u64 {
        self.minted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken::new(
            format!("{}-{n}", self.prefix),
            Utc::now() + self.lifetime,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_call_mints_fresh_token() {
        let source = StaticTokenSource::new("tok", Duration::minutes(5));
        let a = source.token().await.unwrap();
        let b = source.token().await.unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(source.minted(), 2);
        a.ensure_valid().unwrap();
    }

    #[tokio::test]
    async fn test_expired_token_is_forbidden() {
        let source = StaticTokenSource::new("tok", Duration::seconds(-1));
        let token = source.token().await.unwrap();
        let err = token.ensure_valid().unwrap_err();
        assert_eq!(err.status().code(), 403);
    }
}
