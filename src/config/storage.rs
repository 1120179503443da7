use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Result;

/// Local directories used by the backing store and the log writer
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Sled database root directory
    ///
    /// Default: `default_db_dir()` (/tmp/flashsale/db)
    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    /// Log files output directory
    ///
    /// Default: `default_log_dir()` (./logs)
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_root_dir: default_db_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.db_root_dir, "db_root_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;
        Ok(())
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/flashsale/db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
