//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations shared by every process that touches a boot group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persisted card group document.
    /// Default: /var/lib/alsa/card-groups.toml
    #[serde(default = "PathsConfig::default_group_file")]
    pub group_file: PathBuf,

    /// Advisory lock file guarding load-mutate-save cycles on the group file.
    /// When unset, `<group_file>.lock` is used.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

impl PathsConfig {
    fn default_group_file() -> PathBuf {
        PathBuf::from("/var/lib/alsa/card-groups.toml")
    }

    /// Lock file actually in effect.
    pub fn effective_lock_file(&self) -> PathBuf {
        match &self.lock_file {
            Some(path) => path.clone(),
            None => {
                let mut name = self.group_file.clone().into_os_string();
                name.push(".lock");
                PathBuf::from(name)
            }
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            group_file: Self::default_group_file(),
            lock_file: None,
        }
    }
}

/// Timing knobs for the coordinator and its callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Synchronization window in seconds used when neither the caller nor
    /// the group supplies one.
    /// Default: 30
    #[serde(default = "SyncConfig::default_sync_time")]
    pub default_sync_time: i64,

    /// Seconds to wait for the group file lock before giving up.
    /// Default: 10
    #[serde(default = "SyncConfig::default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl SyncConfig {
    fn default_sync_time() -> i64 {
        30
    }

    fn default_lock_timeout() -> u64 {
        10
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_sync_time: Self::default_sync_time(),
            lock_timeout_secs: Self::default_lock_timeout(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: warn
    #[serde(default = "LoggingConfig::default_log_level")]
    pub log_level: String,
}

impl LoggingConfig {
    fn default_log_level() -> String {
        "warn".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
