//! Single-scalar state files kept outside the vault.
//!
//! # Responsibility
//! - Persist the transport checkpoint (last-seen message timestamp).
//! - Persist the notifier's activity-log cursor.
//!
//! # Invariants
//! - A missing file means "never recorded", not zero.
//! - Saves go through temp file + rename.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const TRANSPORT_CHECKPOINT_FILE: &str = "last_processed";
const LOG_CURSOR_FILE: &str = "log_cursor";

#[derive(Debug)]
pub enum CheckpointError {
    Io { path: PathBuf, source: io::Error },
    InvalidValue { path: PathBuf, value: String },
}

impl Display for CheckpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::InvalidValue { path, value } => {
                write!(f, "invalid checkpoint `{value}` in {}", path.display())
            }
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::InvalidValue { .. } => None,
        }
    }
}

/// File holding one signed integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Checkpoint stored at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Transport checkpoint under `state_dir`.
    pub fn transport(state_dir: &Path) -> Self {
        Self::new(state_dir.join(TRANSPORT_CHECKPOINT_FILE))
    }

    /// Activity-log cursor under `state_dir`.
    pub fn log_cursor(state_dir: &Path) -> Self {
        Self::new(state_dir.join(LOG_CURSOR_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored value; `None` when the file is missing or blank.
    pub fn load(&self) -> Result<Option<i64>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<i64>()
            .map(Some)
            .map_err(|_| CheckpointError::InvalidValue {
                path: self.path.clone(),
                value: trimmed.to_string(),
            })
    }

    /// Replaces the stored value atomically, creating the parent directory.
    pub fn save(&self, value: i64) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, value.to_string()).map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)
    }
}
