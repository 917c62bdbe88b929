use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vellum_core::{Result, VellumError};

/// Configuration for the LMDB key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmdbConfig {
    /// Directory holding the LMDB environment
    pub path: PathBuf,

    /// Maximum map size in bytes (default: 1GB)
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum concurrent read transactions (default: 126)
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Durability of each commit
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Maximum documents returned per query page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// `fsync()` on every commit
    Full,

    /// Skip syncing the meta page; the last commit may be lost on OS crash,
    /// the environment stays consistent
    #[default]
    NoMetaSync,

    /// No `fsync()` at all. Only for ephemeral or test stores.
    NoSync,
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024
}

fn default_max_readers() -> u32 {
    126
}

fn default_page_size() -> usize {
    100
}

impl LmdbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size: default_map_size(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
            page_size: default_page_size(),
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reject settings no store can run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(VellumError::Config("page_size must be at least 1".into()));
        }
        if self.map_size == 0 {
            return Err(VellumError::Config("map_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: LmdbConfig = serde_json::from_str(r#"{"path": "/tmp/kv"}"#).unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_readers, 126);
        assert_eq!(config.sync_mode, SyncMode::NoMetaSync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config: LmdbConfig =
            serde_json::from_str(r#"{"path": "/tmp/kv", "page_size": 0}"#).unwrap();
        assert!(matches!(config.validate(), Err(VellumError::Config(_))));
    }
}
