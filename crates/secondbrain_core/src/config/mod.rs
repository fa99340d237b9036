//! Settings loading: base YAML file plus optional local overlay.
//!
//! # Responsibility
//! - Read `config.yaml` and merge `config.local.yaml` on top.
//! - Produce one immutable, validated `Settings` value.
//!
//! # Invariants
//! - Overlay mappings merge recursively; scalars and sequences replace.
//! - Loading never touches the vault.

mod settings;

pub use settings::{
    expand_path, ClassifierSettings, FeedbackSettings, LoggingSettings, PathSettings,
    RoutingSettings, Settings,
};

use log::info;
use serde_yaml::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const BASE_CONFIG_FILE: &str = "config.yaml";
pub const LOCAL_CONFIG_FILE: &str = "config.local.yaml";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Yaml { path: PathBuf, source: serde_yaml::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Yaml { path, source } => {
                write!(f, "invalid config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Yaml { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

/// Loads, merges, expands and validates settings from `config_dir`.
///
/// # Errors
/// - The base file is missing or unreadable.
/// - Either file is not valid YAML or does not match the settings shape.
/// - The merged settings violate a structural invariant.
pub fn load_settings(config_dir: &Path) -> ConfigResult<Settings> {
    let base_path = config_dir.join(BASE_CONFIG_FILE);
    let local_path = config_dir.join(LOCAL_CONFIG_FILE);

    let mut merged = read_yaml(&base_path)?;
    let has_local = local_path.exists();
    if has_local {
        let overlay = read_yaml(&local_path)?;
        merged = deep_merge(merged, overlay);
    }

    let settings: Settings =
        serde_yaml::from_value(merged).map_err(|source| ConfigError::Yaml {
            path: base_path.clone(),
            source,
        })?;
    let settings = settings.expand_paths().validate()?;

    info!(
        "event=config_load module=config status=ok base={} local_overlay={} categories={}",
        base_path.display(),
        has_local,
        settings.categories.len()
    );
    Ok(settings)
}

fn read_yaml(path: &Path) -> ConfigResult<Value> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Value::Mapping(serde_yaml::Mapping::new()));
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively merges `overlay` into `base`; overlay wins on conflicts.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}
