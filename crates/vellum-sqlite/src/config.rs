use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vellum_core::{Result, VellumError};

/// Configuration for the SQLite relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file
    pub path: PathBuf,

    /// Enable WAL journal mode (default: true)
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// SQLite synchronous mode
    #[serde(default)]
    pub synchronous: SynchronousMode,

    /// How long a connection waits on a locked database before giving up
    /// (default: 5000)
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Maximum rows scanned per query page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynchronousMode {
    /// Full fsync (safest, slowest)
    Full,
    /// fsync at critical moments
    #[default]
    Normal,
    /// No fsync
    Off,
}

impl SynchronousMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            SynchronousMode::Full => "FULL",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Off => "OFF",
        }
    }
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_page_size() -> usize {
    100
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_mode: default_wal_mode(),
            synchronous: SynchronousMode::default(),
            busy_timeout_ms: default_busy_timeout(),
            page_size: default_page_size(),
        }
    }

    pub fn with_synchronous(mut self, synchronous: SynchronousMode) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_wal_mode(mut self, wal_mode: bool) -> Self {
        self.wal_mode = wal_mode;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: SqliteConfig = serde_json::from_str(r#"{"path": "/tmp/v.db"}"#).unwrap();
        assert!(config.wal_mode);
        assert_eq!(config.synchronous, SynchronousMode::Normal);
        assert_eq!(config.page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"path": "/tmp/v.db", "page_size": 0}"#).unwrap();
        assert!(matches!(config.validate(), Err(VellumError::Config(_))));
    }
}
