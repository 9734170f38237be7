//! On-disk locations used by the application.

use std::path::{Path, PathBuf};

use bastion_storage::Database;

/// Files and directories under the application data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Metadata snapshot, also read back as the local metadata.
    pub snapshot_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Layout rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            db_path: data_dir.join("bastion.db"),
            snapshot_path: data_dir.join("filters.json"),
            logs_dir: data_dir.join("logs"),
            data_dir,
        }
    }

    /// Layout rooted at `data_dir`, or at the platform data directory.
    pub fn resolve(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        match data_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Ok(Self::new(Database::data_dir()?)),
        }
    }
}
