//! Store configuration.
//!
//! Provides [`StoreConfig`] with defaults for the data directory and RocksDB
//! tuning. Binaries override fields from flags or the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`TreeStore`](crate::TreeStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Whether each transaction reads from a snapshot taken when it opens.
    pub snapshot_reads: bool,
    /// RocksDB open-file limit, `None` for the library default.
    pub max_open_files: Option<i32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hdtree");

        Self {
            data_dir,
            snapshot_reads: true,
            max_open_files: None,
        }
    }
}

impl StoreConfig {
    /// Path to the RocksDB directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("treedata")
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_max_open_files(mut self, max: i32) -> Self {
        self.max_open_files = Some(max);
        self
    }
}
