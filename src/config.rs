use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::index::IndexType;

/// Configuration for an engine instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the data file set.
    pub dir_path: PathBuf,

    /// Target maximum bytes per data file before rotation (default: 256MB).
    pub data_file_size: u64,

    /// Fsync the active file after every append (default: false).
    pub sync_writes: bool,

    /// If non-zero and `sync_writes` is false, fsync after this many
    /// accumulated unsynced bytes (default: 0, disabled).
    pub bytes_per_sync: u64,

    /// In-memory index implementation (default: btree).
    pub index_type: IndexType,

    /// Open data files through read-only mmap during startup recovery,
    /// then revert to standard file IO (default: false).
    pub mmap_at_startup: bool,

    /// Advisory reclaimable-to-total ratio for external merge triggers,
    /// accepted in [0, 1] (default: 0.5).
    pub data_file_merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./emberdb"),
            data_file_size: 256 * 1024 * 1024, // 256MB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir.into(),
            ..Default::default()
        }
    }

    /// Set target data file size before rotation
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Fsync after every append
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Fsync after this many accumulated unsynced bytes
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Select the index implementation
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Map data files read-only into memory during startup recovery
    pub fn mmap_at_startup(mut self, enabled: bool) -> Self {
        self.mmap_at_startup = enabled;
        self
    }

    /// Advisory merge-trigger ratio, in [0, 1]
    pub fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.data_file_merge_ratio = ratio;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("dir path is empty".to_string()));
        }
        if self.data_file_size == 0 {
            return Err(Error::InvalidConfig(
                "data file size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(Error::InvalidConfig(
                "merge ratio must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a write batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of staged writes a single commit may carry (default: 10000).
    pub max_batch_size: usize,

    /// Fsync the active file after the commit terminator (default: true).
    pub sync_writes: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}

impl BatchConfig {
    /// Set the staged-write ceiling
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Fsync after the commit terminator
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }
}

/// Configuration for an engine iterator.
#[derive(Debug, Clone, Default)]
pub struct IteratorConfig {
    /// Only visit keys beginning with this byte string (default: empty, all keys).
    pub prefix: Vec<u8>,

    /// Iterate in reverse lexicographic order (default: false).
    pub reverse: bool,
}

impl IteratorConfig {
    /// Restrict the iterator to keys with the given prefix
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Iterate in reverse lexicographic order
    pub fn reverse(mut self, enabled: bool) -> Self {
        self.reverse = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir_path, PathBuf::from("./emberdb"));
        assert_eq!(config.data_file_size, 256 * 1024 * 1024);
        assert!(!config.sync_writes);
        assert_eq!(config.bytes_per_sync, 0);
        assert_eq!(config.index_type, IndexType::BTree);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/emberdb-test")
            .data_file_size(64 * 1024 * 1024)
            .sync_writes(true)
            .bytes_per_sync(4096)
            .index_type(IndexType::AdaptiveRadix)
            .mmap_at_startup(true)
            .data_file_merge_ratio(0.8);

        assert_eq!(config.dir_path, PathBuf::from("/tmp/emberdb-test"));
        assert_eq!(config.data_file_size, 64 * 1024 * 1024);
        assert!(config.sync_writes);
        assert_eq!(config.bytes_per_sync, 4096);
        assert_eq!(config.index_type, IndexType::AdaptiveRadix);
        assert!(config.mmap_at_startup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::new("");
        assert!(config.validate().is_err());

        let config = Config::new("/tmp/emberdb-test").data_file_size(0);
        assert!(config.validate().is_err());

        let config = Config::new("/tmp/emberdb-test").data_file_merge_ratio(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_config_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size, 10_000);
        assert!(config.sync_writes);
    }
}
