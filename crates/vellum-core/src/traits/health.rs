use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub diagnostics: BTreeMap<String, String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            is_healthy: true,
            diagnostics: BTreeMap::new(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::healthy().with_unhealthy(reason)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.diagnostics.insert(key.into(), value.to_string());
        self
    }

    pub fn with_unhealthy(mut self, reason: impl Into<String>) -> Self {
        self.is_healthy = false;
        self.diagnostics.insert("error".into(), reason.into());
        self
    }
}

/// Anything that can report `GetStatus`
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn get_status(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let ok = HealthStatus::healthy().with("backend", "memory");
        assert!(ok.is_healthy);
        assert_eq!(ok.diagnostics["backend"], "memory");

        let bad = HealthStatus::unhealthy("disk full").with("backend", "lmdb");
        assert!(!bad.is_healthy);
        assert_eq!(bad.diagnostics["error"], "disk full");
    }
}
