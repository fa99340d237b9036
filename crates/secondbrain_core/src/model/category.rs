//! Category definitions and the configured category set.
//!
//! # Responsibility
//! - Describe one routing destination (name, description, folder, keywords).
//! - Provide ordered lookup over the configured set.
//!
//! # Invariants
//! - Category names are unique within a set.
//! - `needs_review` is never a configured category; it is the review sentinel.

use serde::{Deserialize, Serialize};

/// Reserved category value for items held for manual review.
pub const NEEDS_REVIEW: &str = "needs_review";

/// One configured routing destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    /// Lowercase stable name, e.g. `tasks`.
    pub name: String,
    /// Human description handed to the classifier.
    #[serde(default)]
    pub description: String,
    /// Vault-relative folder where filed copies land.
    pub folder: String,
    /// Extra words that select this category in correction text.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CategoryDef {
    /// Builds a definition; keywords are copied as given.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        folder: impl Into<String>,
        keywords: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            folder: folder.into(),
            keywords: keywords.iter().map(|value| (*value).to_string()).collect(),
        }
    }
}

/// Ordered set of configured categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategorySet {
    defs: Vec<CategoryDef>,
}

impl CategorySet {
    pub fn new(defs: Vec<CategoryDef>) -> Self {
        Self { defs }
    }

    /// Case-insensitive lookup by name; surrounding whitespace is ignored.
    pub fn get(&self, name: &str) -> Option<&CategoryDef> {
        let needle = name.trim();
        self.defs
            .iter()
            .find(|def| def.name.eq_ignore_ascii_case(needle))
    }

    /// Whether `name` is a configured category.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Definitions in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &CategoryDef> {
        self.defs.iter()
    }

    /// Category names in configured order.
    pub fn names(&self) -> Vec<&str> {
        self.defs.iter().map(|def| def.name.as_str()).collect()
    }

    /// Number of configured categories.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Slash-joined names used in feedback prompts (`tasks/people/...`).
    pub fn reply_hint(&self) -> String {
        self.names().join("/")
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::new(vec![
            CategoryDef::new(
                "people",
                "Information about a specific person: follow-ups, details, relationships.",
                "Second Brain/People",
                &["person", "contact"],
            ),
            CategoryDef::new(
                "projects",
                "Multi-step work with a goal: next actions and status for an ongoing effort.",
                "Second Brain/Projects",
                &["project"],
            ),
            CategoryDef::new(
                "ideas",
                "Thoughts, insights and possibilities worth revisiting later.",
                "Second Brain/Ideas",
                &["idea"],
            ),
            CategoryDef::new(
                "tasks",
                "Single errands or admin to-dos with no larger project attached.",
                "Second Brain/Admin",
                &["task", "admin", "todo", "errand"],
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::CategorySet;

    #[test]
    fn lookup_is_case_insensitive_and_trimmed() {
        let set = CategorySet::default();
        assert_eq!(set.get(" Tasks ").map(|def| def.folder.as_str()), Some("Second Brain/Admin"));
        assert!(!set.contains("needs_review"));
    }

    #[test]
    fn reply_hint_follows_configured_order() {
        assert_eq!(CategorySet::default().reply_hint(), "people/projects/ideas/tasks");
    }
}
