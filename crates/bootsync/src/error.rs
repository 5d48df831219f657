use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the boot coordinator.
///
/// "Not present" and "not participating" are never errors; they come back
/// as neutral results from the operations themselves.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("card {card}: {op} failed: {message}")]
    Control {
        card: i32,
        op: &'static str,
        message: String,
    },

    #[error("card {0} is not available")]
    NoSuchCard(i32),

    #[error("card {card}: control handle is read-only")]
    ReadOnly { card: i32 },

    #[error("card {card}: '.Boot' element must be {expected}, found {found}")]
    ElementShape {
        card: i32,
        expected: &'static str,
        found: String,
    },

    #[error("group file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("group '{group}': field '{field}' {message}")]
    MalformedGroup {
        group: String,
        field: String,
        message: String,
    },

    #[error("{source_name} synchronization window does not match ({value} != {group_value})")]
    SyncTimeMismatch {
        source_name: &'static str,
        value: i64,
        group_value: i64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("lock {path} not acquired within {waited_secs}s")]
    LockTimeout { path: PathBuf, waited_secs: u64 },

    #[error("clock read failed: {0}")]
    Clock(std::io::Error),
}

impl BootError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BootError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(
        group: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BootError::MalformedGroup {
            group: group.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootError>;
