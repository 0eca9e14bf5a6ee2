use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};

/// Database file used when no data source is configured.
pub const DEFAULT_DB_FILE: &str = "assoc.db";

/// Store configuration, usually read from a TOML file.
///
/// ```toml
/// root = "/var/lib/assoc"
/// data_source = "sqlite3:/var/lib/assoc/assoc.db"
/// default_isolation = "file-exclusive"
/// max_lock_wait_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `blobs/`, `temp/` and the lock files.
    pub root: PathBuf,
    /// `<provider>:<parameters>`; defaults to a SQLite file under `root`.
    pub data_source: Option<String>,
    /// Isolation level used when a commit does not name one.
    pub default_isolation: String,
    /// Longest wait for the commit and temp locks; 0 waits forever.
    pub max_lock_wait_ms: u64,
    /// Remove stale lock files before first use.
    pub clear_locks: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            data_source: None,
            default_isolation: "full".to_string(),
            max_lock_wait_ms: 10_000,
            clear_locks: false,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> EnvResult<Self> {
        toml::from_str(text).map_err(|e| EnvError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> EnvResult<Self> {
        let text = std::fs::read_to_string(path).map_err(EnvError::io(path))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> EnvResult<String> {
        toml::to_string_pretty(self).map_err(|e| EnvError::Config(e.to_string()))
    }

    /// The configured data source, or the default SQLite file under `root`.
    pub fn resolved_data_source(&self) -> String {
        match &self.data_source {
            Some(ds) => ds.clone(),
            None => format!("sqlite3:{}", self.root.join(DEFAULT_DB_FILE).display()),
        }
    }

    /// `None` means block forever.
    pub fn max_lock_wait(&self) -> Option<Duration> {
        match self.max_lock_wait_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
