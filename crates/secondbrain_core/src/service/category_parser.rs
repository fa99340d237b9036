//! Free-text category intent parsing.
//!
//! Pure functions only; no I/O. Used by the ingestor to turn correction text
//! such as `fix: idea` or `move to projects` into a configured category.

use crate::model::category::CategorySet;
use once_cell::sync::Lazy;
use regex::Regex;

static FIX_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^fix:\s*(.+)$").expect("valid fix prefix regex"));

/// Ordered keyword matchers, one per configured category.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    entries: Vec<(String, Regex)>,
}

impl KeywordTable {
    /// Builds matchers from category names plus their configured keywords.
    pub fn from_categories(categories: &CategorySet) -> Self {
        let entries = categories
            .iter()
            .filter_map(|def| {
                let mut words = vec![regex::escape(&def.name.to_lowercase())];
                words.extend(
                    def.keywords
                        .iter()
                        .map(|keyword| keyword.trim().to_lowercase())
                        .filter(|keyword| !keyword.is_empty())
                        .map(|keyword| regex::escape(&keyword)),
                );
                let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
                // Escaped words always compile.
                Regex::new(&pattern)
                    .ok()
                    .map(|matcher| (def.name.clone(), matcher))
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First category (in configured order) whose name or keyword appears as a
/// whole word in `text`.
pub fn parse_category(text: &str, table: &KeywordTable) -> Option<String> {
    table
        .entries
        .iter()
        .find(|(_, matcher)| matcher.is_match(text))
        .map(|(name, _)| name.clone())
}

/// Returns the instruction after a legacy `fix:` prefix, if present.
pub fn parse_fix_command(text: &str) -> Option<&str> {
    FIX_PREFIX_RE
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().trim())
        .filter(|value| !value.is_empty())
}
