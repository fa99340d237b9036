//! Typed, already-merged settings value threaded into every entry point.
//!
//! # Invariants
//! - A `Settings` returned by `validate()` has a vault, at least one
//!   category, unique lowercase category names and a threshold in `[0, 1]`.
//! - `needs_review` is never a configured category name.

use crate::config::ConfigError;
use crate::logging::default_log_level;
use crate::model::category::{CategorySet, NEEDS_REVIEW};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("valid env var regex")
});
static CATEGORY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid category name regex"));

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
const DEFAULT_SETTLE_DELAY_SECS: u64 = 10;
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Root settings object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Self handles; the first one receives notifications.
    pub handles: Vec<String>,
    pub paths: PathSettings,
    pub categories: CategorySet,
    pub routing: RoutingSettings,
    pub classifier: ClassifierSettings,
    pub feedback: FeedbackSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub vault: PathBuf,
    /// Holding area, relative to the vault.
    pub inbox: PathBuf,
    /// Archive area, relative to the vault.
    pub processed: PathBuf,
    /// Activity log file, relative to the vault.
    pub activity_log: PathBuf,
    pub state_dir: PathBuf,
    pub chat_db: PathBuf,
    pub audit_dir: PathBuf,
    /// Defaults to `<state_dir>/logs` when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            vault: PathBuf::new(),
            inbox: PathBuf::from("Second Brain/Inbox"),
            processed: PathBuf::from("Second Brain/Inbox/Processed"),
            activity_log: PathBuf::from("Second Brain/Inbox-Log.md"),
            state_dir: PathBuf::from("~/.imessage-capture"),
            chat_db: PathBuf::from("~/Library/Messages/chat.db"),
            audit_dir: PathBuf::from("~/.second_brain-audit"),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Classifications below this confidence are held for review.
    pub confidence_threshold: f64,
    /// Wait before processing so an external sync layer can settle.
    pub settle_delay_secs: u64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
        }
    }
}

impl RoutingSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub executable: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            args: vec!["--print".to_string()],
            timeout_secs: DEFAULT_CLASSIFIER_TIMEOUT_SECS,
        }
    }
}

impl ClassifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    /// Feedback requests for needs-review items.
    pub enabled: bool,
    /// Confirmation messages for filed items.
    pub confirmations: bool,
    pub send_timeout_secs: u64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            confirmations: true,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
        }
    }
}

impl FeedbackSettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
        }
    }
}

impl Settings {
    /// Default settings rooted at `vault`, with state kept under the vault.
    ///
    /// Used by tests and embedders that do not load YAML files.
    pub fn for_vault(vault: impl Into<PathBuf>) -> Self {
        let vault = vault.into();
        let mut settings = Self::default();
        settings.paths.state_dir = vault.join(".secondbrain");
        settings.paths.audit_dir = vault.join(".secondbrain/audit");
        settings.paths.vault = vault;
        settings.routing.settle_delay_secs = 0;
        settings
    }

    /// Holding area for pending and held items.
    pub fn inbox_dir(&self) -> PathBuf {
        self.paths.vault.join(&self.paths.inbox)
    }

    /// Archive for filed items.
    pub fn processed_dir(&self) -> PathBuf {
        self.paths.vault.join(&self.paths.processed)
    }

    pub fn activity_log_path(&self) -> PathBuf {
        self.paths.vault.join(&self.paths.activity_log)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.paths
            .log_dir
            .clone()
            .unwrap_or_else(|| self.paths.state_dir.join("logs"))
    }

    /// Notification recipient (first handle).
    pub fn recipient(&self) -> Option<&str> {
        self.handles
            .first()
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Expands `~` and environment variables in every path setting.
    pub fn expand_paths(mut self) -> Self {
        self.paths.vault = expand_path(&self.paths.vault);
        self.paths.state_dir = expand_path(&self.paths.state_dir);
        self.paths.chat_db = expand_path(&self.paths.chat_db);
        self.paths.audit_dir = expand_path(&self.paths.audit_dir);
        self.paths.log_dir = self.paths.log_dir.as_deref().map(expand_path);
        self
    }

    /// Checks structural invariants before any processing happens.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.paths.vault.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.vault is required".to_string()));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one category must be configured".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for category in self.categories.iter() {
            if !CATEGORY_NAME_RE.is_match(&category.name) {
                return Err(ConfigError::Invalid(format!(
                    "category name `{}` must match [a-z0-9_-]+",
                    category.name
                )));
            }
            if category.name == NEEDS_REVIEW {
                return Err(ConfigError::Invalid(format!(
                    "`{NEEDS_REVIEW}` is reserved and cannot be a category"
                )));
            }
            if category.folder.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "category `{}` has no folder",
                    category.name
                )));
            }
            if !seen.insert(category.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "category `{}` is configured twice",
                    category.name
                )));
            }
        }

        let threshold = self.routing.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "routing.confidence_threshold must be within [0, 1], got {threshold}"
            )));
        }

        Ok(self)
    }
}

/// Expands a leading `~` and `$VAR` / `${VAR}` references.
///
/// Unknown variables are left untouched.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let with_env = ENV_VAR_RE.replace_all(&raw, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    if with_env == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = with_env.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(with_env.into_owned())
}
