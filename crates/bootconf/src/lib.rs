//! Configuration loading for bootsync.
//!
//! Every short-lived process that brings a card up reads the same
//! configuration, so the crate stays small and dependency-light.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bootconf::BootConfig;
//!
//! let config = BootConfig::load().expect("Failed to load config");
//! println!("Group file: {}", config.paths.group_file.display());
//! println!("Sync window: {}s", config.sync.default_sync_time);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/bootsync/config.toml` (system)
//! 2. `~/.config/bootsync/config.toml` (user)
//! 3. `./bootsync.toml` or the `--config` path (local override)
//! 4. Environment variables (`BOOTSYNC_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! group_file = "/var/lib/alsa/card-groups.toml"
//! lock_file = "/run/lock/card-groups.lock"
//!
//! [sync]
//! default_sync_time = 30
//! lock_timeout_secs = 10
//!
//! [logging]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{LoggingConfig, PathsConfig, SyncConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete bootsync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BootConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BootConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./bootsync.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = BootConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# bootsync configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "group_file = \"{}\"\n",
            self.paths.group_file.display()
        ));
        output.push_str(&format!(
            "lock_file = \"{}\"\n",
            self.paths.effective_lock_file().display()
        ));

        output.push_str("\n[sync]\n");
        output.push_str(&format!(
            "default_sync_time = {}\n",
            self.sync.default_sync_time
        ));
        output.push_str(&format!(
            "lock_timeout_secs = {}\n",
            self.sync.lock_timeout_secs
        ));

        output.push_str("\n[logging]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.logging.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BootConfig::default();
        assert_eq!(
            config.paths.group_file,
            PathBuf::from("/var/lib/alsa/card-groups.toml")
        );
        assert_eq!(config.sync.default_sync_time, 30);
        assert_eq!(config.logging.log_level, "warn");
    }

    #[test]
    fn test_to_toml_parses_back() {
        let config = BootConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.contains("[paths]"));
        assert!(rendered.contains("[sync]"));

        let mut reparsed = BootConfig::default();
        loader::apply_toml(&mut reparsed, &rendered, Path::new("rendered.toml")).unwrap();
        assert_eq!(reparsed.paths.group_file, config.paths.group_file);
        assert_eq!(reparsed.sync, config.sync);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nlock_timeout_secs = 2").unwrap();

        let (config, sources) = BootConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert!(sources.files.contains(&file.path().to_path_buf()));
        // Environment may override, but the file value is the only source here
        if !sources.env_overrides.iter().any(|v| v == "BOOTSYNC_LOCK_TIMEOUT") {
            assert_eq!(config.sync.lock_timeout_secs, 2);
        }
    }
}
