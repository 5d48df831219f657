//! Where configuration comes from: files in a fixed search order, then
//! the environment.

use crate::{BootConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Which files and environment variables produced a [`BootConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files applied, first to last
    pub files: Vec<PathBuf>,
    /// Names of the environment variables that were applied
    pub env_overrides: Vec<String>,
}

const SYSTEM_CONFIG: &str = "/etc/bootsync/config.toml";
const USER_CONFIG: &str = "bootsync/config.toml";
const LOCAL_CONFIG: &str = "bootsync.toml";

/// Existing config files, system first.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], with `cli_path` standing in for
/// `./bootsync.toml` when it exists.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(USER_CONFIG));
    let local = cli_path
        .filter(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG));

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|candidate| candidate.exists())
        .collect()
}

/// Read a TOML file and overlay the keys it sets onto `config`.
pub fn apply_file(config: &mut BootConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay the keys present in `contents`; absent keys keep their current value.
pub(crate) fn apply_toml(
    config: &mut BootConfig,
    contents: &str,
    path: &Path,
) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let invalid = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("group_file") {
            let v = v.as_str().ok_or_else(|| invalid("paths.group_file", "a string"))?;
            config.paths.group_file = expand_path(v);
        }
        if let Some(v) = paths.get("lock_file") {
            let v = v.as_str().ok_or_else(|| invalid("paths.lock_file", "a string"))?;
            config.paths.lock_file = Some(expand_path(v));
        }
    }

    if let Some(sync) = table.get("sync").and_then(|v| v.as_table()) {
        if let Some(v) = sync.get("default_sync_time") {
            let v = v
                .as_integer()
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid("sync.default_sync_time", "a positive integer"))?;
            config.sync.default_sync_time = v;
        }
        if let Some(v) = sync.get("lock_timeout_secs") {
            let v = v
                .as_integer()
                .filter(|v| *v >= 0)
                .ok_or_else(|| invalid("sync.lock_timeout_secs", "a non-negative integer"))?;
            config.sync.lock_timeout_secs = v as u64;
        }
    }

    if let Some(logging) = table.get("logging").and_then(|v| v.as_table()) {
        if let Some(v) = logging.get("log_level") {
            let v = v.as_str().ok_or_else(|| invalid("logging.log_level", "a string"))?;
            config.logging.log_level = v.to_string();
        }
    }

    Ok(())
}

/// Read `name`, recording it in `sources` when `accept` takes the value.
fn env_override<T>(
    name: &str,
    sources: &mut ConfigSources,
    accept: impl FnOnce(&str) -> Option<T>,
) -> Option<T> {
    let value = accept(&env::var(name).ok()?)?;
    sources.env_overrides.push(name.to_string());
    Some(value)
}

/// Overlay `BOOTSYNC_*` variables, then `RUST_LOG`, onto `config`.
/// Values that do not parse are ignored.
pub fn apply_env_overrides(config: &mut BootConfig, sources: &mut ConfigSources) {
    if let Some(path) = env_override("BOOTSYNC_GROUP_FILE", sources, |v| Some(expand_path(v))) {
        config.paths.group_file = path;
    }
    if let Some(path) = env_override("BOOTSYNC_LOCK_FILE", sources, |v| Some(expand_path(v))) {
        config.paths.lock_file = Some(path);
    }
    if let Some(secs) = env_override("BOOTSYNC_SYNC_TIME", sources, |v| {
        v.parse::<i64>().ok().filter(|secs| *secs > 0)
    }) {
        config.sync.default_sync_time = secs;
    }
    if let Some(secs) = env_override("BOOTSYNC_LOCK_TIMEOUT", sources, |v| v.parse().ok()) {
        config.sync.lock_timeout_secs = secs;
    }
    for name in ["BOOTSYNC_LOG_LEVEL", "RUST_LOG"] {
        if let Some(level) = env_override(name, sources, |v| Some(v.to_string())) {
            config.logging.log_level = level;
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    match path.strip_prefix("~/").and_then(|rest| Some(home()?.join(rest))) {
        Some(expanded) => expanded,
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/groups/cards.toml");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("groups/cards.toml"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/var/lib/alsa/card-groups.toml");
        assert_eq!(expanded, PathBuf::from("/var/lib/alsa/card-groups.toml"));
    }

    #[test]
    fn test_cli_path_replaces_local_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last(), Some(&file.path().to_path_buf()));
        assert!(!files.contains(&PathBuf::from(LOCAL_CONFIG)));
    }

    #[test]
    fn test_missing_cli_path_is_skipped() {
        let files = discover_config_files_with_override(Some(Path::new("/nonexistent/bootsync.toml")));
        assert!(!files.contains(&PathBuf::from("/nonexistent/bootsync.toml")));
    }

    #[test]
    fn test_overlay_keeps_unset_keys() {
        let mut config = BootConfig::default();
        let toml = r#"
[paths]
group_file = "/custom/groups.toml"
"#;
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.paths.group_file, PathBuf::from("/custom/groups.toml"));
        assert_eq!(config.paths.lock_file, None);
        assert_eq!(config.sync.default_sync_time, 30);
    }

    #[test]
    fn test_later_overlay_wins() {
        let mut config = BootConfig::default();
        apply_toml(
            &mut config,
            "[sync]\ndefault_sync_time = 45\nlock_timeout_secs = 3\n",
            Path::new("system.toml"),
        )
        .unwrap();
        apply_toml(
            &mut config,
            "[sync]\ndefault_sync_time = 20\n",
            Path::new("local.toml"),
        )
        .unwrap();

        assert_eq!(config.sync.default_sync_time, 20);
        assert_eq!(config.sync.lock_timeout_secs, 3);
    }

    #[test]
    fn test_full_overlay() {
        let mut config = BootConfig::default();
        let toml = r#"
[paths]
group_file = "/data/groups.toml"
lock_file = "/run/lock/bootsync.lock"

[sync]
default_sync_time = 60
lock_timeout_secs = 5

[logging]
log_level = "debug"
"#;
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.paths.group_file, PathBuf::from("/data/groups.toml"));
        assert_eq!(
            config.paths.effective_lock_file(),
            PathBuf::from("/run/lock/bootsync.lock")
        );
        assert_eq!(config.sync.default_sync_time, 60);
        assert_eq!(config.sync.lock_timeout_secs, 5);
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn test_rejects_non_positive_sync_time() {
        let mut config = BootConfig::default();
        let err = apply_toml(
            &mut config,
            "[sync]\ndefault_sync_time = 0\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_sync_time"));
    }

    #[test]
    fn test_rejects_broken_toml() {
        let mut config = BootConfig::default();
        let result = apply_toml(&mut config, "[paths\n", Path::new("broken.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
