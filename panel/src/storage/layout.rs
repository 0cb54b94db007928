//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::PanelError;
use crate::filesys::file::File;

/// Default data directory of the panel daemon
pub const DEFAULT_DATA_DIR: &str = "/etc/vpanel";

/// On-disk layout of the panel data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Snapshot of projects, users and deployment records
    pub fn state_file(&self) -> File {
        File::new(self.base_dir.join("state.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), PanelError> {
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}
