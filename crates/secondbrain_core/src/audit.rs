//! Weekly JSONL audit trail of processing operations.
//!
//! # Responsibility
//! - Append one JSON object per operation to `audit-<YYYY>-W<WW>.jsonl`.
//! - Read recent entries back and render a count summary.
//!
//! # Invariants
//! - Callers treat audit failures as non-fatal.
//! - Unparseable lines are skipped on read.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "audit-";
const FILE_EXTENSION: &str = "jsonl";

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug)]
pub enum AuditError {
    Io { path: PathBuf, source: io::Error },
    Json(serde_json::Error),
}

impl Display for AuditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "audit log `{}`: {source}", path.display()),
            Self::Json(err) => write!(f, "audit entry encoding failed: {err}"),
        }
    }
}

impl Error for AuditError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<FixedOffset>,
    pub skill: String,
    pub operation: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    /// Audit log writing one JSONL file per week under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current week's file.
    pub fn current_path(&self) -> PathBuf {
        self.path_for(Local::now())
    }

    fn path_for(&self, at: DateTime<Local>) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}{}.{FILE_EXTENSION}",
            at.format("%Y-W%W")
        ))
    }

    /// Appends one entry stamped with the local time.
    ///
    /// Object `details` are flattened into the entry; any other value is
    /// stored under `details`.
    pub fn record(&self, skill: &str, operation: &str, details: Value) -> AuditResult<()> {
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("details".to_string(), other);
                map
            }
        };
        let now = Local::now();
        let entry = AuditEntry {
            timestamp: now.fixed_offset(),
            skill: skill.to_string(),
            operation: operation.to_string(),
            details,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let path = self.path_for(now);
        let io_error = |source| AuditError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_error)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)?;
        Ok(())
    }

    /// Entries from the last `days` days, newest first.
    pub fn recent(&self, days: u32) -> AuditResult<Vec<AuditEntry>> {
        let cutoff = Local::now().fixed_offset() - ChronoDuration::days(i64::from(days));
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut recent = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_audit_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXTENSION)
                });
            if !is_audit_file {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            recent.extend(
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str::<AuditEntry>(line.trim()).ok())
                    .filter(|entry| entry.timestamp >= cutoff),
            );
        }
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(recent)
    }

    /// Human-readable digest of the last `days` days.
    pub fn summarize(&self, days: u32) -> AuditResult<String> {
        Ok(summarize_entries(&self.recent(days)?, days))
    }
}

/// Human-readable counts by skill and operation for newest-first `entries`.
pub fn summarize_entries(entries: &[AuditEntry], days: u32) -> String {
    if entries.is_empty() {
        return format!("No audit logs found for the last {days} days.");
    }

    let mut lines = vec![
        format!("Audit Log Summary (Last {days} days)"),
        format!("Total Operations: {}", entries.len()),
        String::new(),
        "By Skill:".to_string(),
    ];
    lines.extend(ranked_counts(entries.iter().map(|entry| entry.skill.as_str())));
    lines.push(String::new());
    lines.push("By Operation:".to_string());
    lines.extend(ranked_counts(
        entries.iter().map(|entry| entry.operation.as_str()),
    ));
    lines.push(String::new());
    if let (Some(latest), Some(earliest)) = (entries.first(), entries.last()) {
        lines.push(format!("Earliest: {}", earliest.timestamp.to_rfc3339()));
        lines.push(format!("Latest: {}", latest.timestamp.to_rfc3339()));
    }
    lines.join("\n")
}

fn ranked_counts<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut ranked = counts.into_iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .map(|(name, count)| format!("  {name}: {count}"))
        .collect()
}
