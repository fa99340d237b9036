//! Activity log writer and reader (`Inbox-Log.md`).
//!
//! # Responsibility
//! - Append one table row per routing decision under a per-day section.
//! - Parse rows back for the notifier.
//!
//! # Invariants
//! - Days are ordered newest first; rows within a day newest first.
//! - A new row lands directly under its day's table separator.
//! - Existing rows are never rewritten or removed.

use crate::model::item::preview_text;
use crate::store::item_store::write_atomic;
use crate::store::StoreError;
use chrono::{DateTime, Local, NaiveDate};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const LOG_TITLE: &str = "# Inbox Processing Log";
const DAY_HEADING_PREFIX: &str = "## ";
const TABLE_HEADER: &str = "| Time | Original | Category | Destination | Status |";
const TABLE_SEPARATOR: &str = "|------|----------|----------|-------------|--------|";
const ORIGINAL_MAX_CHARS: usize = 40;
const NO_DESTINATION: &str = "-";

pub type ActivityLogResult<T> = Result<T, ActivityLogError>;

#[derive(Debug)]
pub enum ActivityLogError {
    Io { path: PathBuf, source: io::Error },
    Write(StoreError),
}

impl Display for ActivityLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "activity log `{}`: {source}", path.display())
            }
            Self::Write(err) => write!(f, "activity log write failed: {err}"),
        }
    }
}

impl Error for ActivityLogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Write(err) => Some(err),
        }
    }
}

impl From<StoreError> for ActivityLogError {
    fn from(value: StoreError) -> Self {
        Self::Write(value)
    }
}

/// Row status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Filed,
    Fixed,
    NeedsReview,
}

impl RowStatus {
    /// Text written in the status column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filed => "Filed",
            Self::Fixed => "Fixed",
            Self::NeedsReview => "Needs Review",
        }
    }

    /// Reads a status cell; unknown text yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Filed" => Some(Self::Filed),
            "Fixed" => Some(Self::Fixed),
            "Needs Review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

/// One table row, cells already in display form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub time: String,
    pub original: String,
    pub category: String,
    /// `[[vault/relative/path]]`, or `-` when nothing was filed.
    pub destination: String,
    pub status: RowStatus,
}

impl LogRow {
    pub fn new(
        at: DateTime<Local>,
        original: &str,
        category: &str,
        destination: Option<&str>,
        status: RowStatus,
    ) -> Self {
        Self {
            time: at.format("%H:%M").to_string(),
            original: preview_text(original, ORIGINAL_MAX_CHARS),
            category: category.to_string(),
            destination: destination.map_or_else(|| NO_DESTINATION.to_string(), wiki_link),
            status,
        }
    }

    /// Title of the filed note, taken from the destination link.
    pub fn title(&self) -> Option<&str> {
        let inner = self
            .destination
            .strip_prefix("[[")
            .and_then(|rest| rest.strip_suffix("]]"))?;
        inner.rsplit('/').next().filter(|title| !title.is_empty())
    }

    fn render(&self) -> String {
        format!(
            "| {} | {} | {} | {} | {} |",
            escape_cell(&self.time),
            escape_cell(&self.original),
            escape_cell(&self.category),
            escape_cell(&self.destination),
            self.status.as_str()
        )
    }
}

/// File-backed activity log.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    /// Log backed by the markdown file at `path`; nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the markdown log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts `row` under the section for `date`, creating what is missing.
    pub fn append(&self, row: &LogRow, date: NaiveDate) -> ActivityLogResult<()> {
        let current = self.read()?.unwrap_or_default();
        let updated = insert_row(&current, date, row);
        write_atomic(&self.path, &updated)?;
        info!(
            "event=activity_log_append module=activity_log status=ok row_status={} category={}",
            row.status.as_str(),
            row.category
        );
        Ok(())
    }

    /// All rows in document order (newest first). Missing log yields none.
    pub fn rows(&self) -> ActivityLogResult<Vec<LogRow>> {
        Ok(self
            .read()?
            .map(|content| parse_rows(&content))
            .unwrap_or_default())
    }

    fn read(&self) -> ActivityLogResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ActivityLogError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// `Second Brain/Admin/Buy milk.md` -> `[[Second Brain/Admin/Buy milk]]`.
pub fn wiki_link(destination: &str) -> String {
    let trimmed = destination.strip_suffix(".md").unwrap_or(destination);
    format!("[[{trimmed}]]")
}

/// Returns `content` with `row` inserted under the `date` section.
pub fn insert_row(content: &str, date: NaiveDate, row: &LogRow) -> String {
    let heading = format!("{DAY_HEADING_PREFIX}{}", date.format("%Y-%m-%d"));
    let rendered = row.render();
    let mut lines: Vec<String> = if content.trim().is_empty() {
        vec![LOG_TITLE.to_string(), String::new()]
    } else {
        content.lines().map(str::to_string).collect()
    };

    if let Some(heading_at) = lines.iter().position(|line| line.trim_end() == heading) {
        let section_end = lines
            .iter()
            .enumerate()
            .skip(heading_at + 1)
            .find(|(_, line)| line.starts_with(DAY_HEADING_PREFIX))
            .map_or(lines.len(), |(index, _)| index);
        let separator_at = (heading_at + 1..section_end).find(|index| is_separator(&lines[*index]));
        match separator_at {
            Some(separator_at) => lines.insert(separator_at + 1, rendered),
            None => {
                let table = [
                    String::new(),
                    TABLE_HEADER.to_string(),
                    TABLE_SEPARATOR.to_string(),
                    rendered,
                ];
                lines.splice(heading_at + 1..heading_at + 1, table);
            }
        }
    } else {
        let insert_at = lines
            .iter()
            .position(|line| {
                section_date(line).is_some_and(|existing| existing < date)
            })
            .unwrap_or(lines.len());
        let mut section = vec![
            heading,
            String::new(),
            TABLE_HEADER.to_string(),
            TABLE_SEPARATOR.to_string(),
            rendered,
            String::new(),
        ];
        if insert_at == lines.len() && lines.last().is_some_and(|line| !line.trim().is_empty()) {
            section.insert(0, String::new());
        }
        lines.splice(insert_at..insert_at, section);
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

/// Parses every data row, in document order. Unknown statuses are skipped.
pub fn parse_rows(content: &str) -> Vec<LogRow> {
    content
        .lines()
        .filter(|line| line.starts_with('|') && !is_separator(line))
        .filter_map(|line| {
            let cells = split_cells(line);
            if cells.len() != 5 || cells[0] == "Time" {
                return None;
            }
            Some(LogRow {
                time: cells[0].clone(),
                original: cells[1].clone(),
                category: cells[2].clone(),
                destination: cells[3].clone(),
                status: RowStatus::parse(&cells[4])?,
            })
        })
        .collect()
}

fn section_date(line: &str) -> Option<NaiveDate> {
    let value = line.strip_prefix(DAY_HEADING_PREFIX)?.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn escape_cell(value: &str) -> String {
    value.replace(['\n', '\r'], " ").replace('|', "\\|")
}

/// Splits a table line on unescaped pipes and unescapes cell contents.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            other => current.push(other),
        }
    }
    cells.push(current.trim().to_string());
    cells
}
