use crate::encryption::ContainerEncryptionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for the document database adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Account endpoint, reported in diagnostics only
    #[serde(default)]
    pub endpoint: String,

    /// Database holding the containers
    pub database: String,

    /// Operation limit of one native transactional batch (default: 100)
    #[serde(default = "default_max_batch_operations")]
    pub max_batch_operations: usize,

    /// Maximum items per query page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Container-level encryption, keyed by container name
    #[serde(default)]
    pub encryption: BTreeMap<String, ContainerEncryptionPolicy>,
}

fn default_max_batch_operations() -> usize {
    100
}

fn default_page_size() -> usize {
    100
}

impl DocumentConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            endpoint: String::new(),
            database: database.into(),
            max_batch_operations: default_max_batch_operations(),
            page_size: default_page_size(),
            encryption: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_batch_operations(mut self, max: usize) -> Self {
        // one record and one event per command
        self.max_batch_operations = max.max(2);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_encryption(
        mut self,
        container: impl Into<String>,
        policy: ContainerEncryptionPolicy,
    ) -> Self {
        self.encryption.insert(container.into(), policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: DocumentConfig = serde_json::from_str(r#"{"database": "app"}"#).unwrap();
        assert_eq!(config.max_batch_operations, 100);
        assert_eq!(config.page_size, 100);
        assert!(config.encryption.is_empty());
    }
}
