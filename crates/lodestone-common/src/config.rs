//! Configuration structures for Lodestone.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{LodeError, Result};
use crate::page::PAGE_SIZE;

/// Storage configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the data file.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_frames: 8192, // 32 MB with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * PAGE_SIZE
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_pool_frames == 0 {
            return Err(LodeError::ConfigError(
                "buffer_pool_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
