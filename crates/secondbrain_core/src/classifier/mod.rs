//! Classifier call contract.
//!
//! # Responsibility
//! - Define the `Classifier` seam used by the router.
//! - Parse classifier output as one strict JSON object.
//!
//! # Invariants
//! - A successful `Classification` has a non-empty category and a finite
//!   confidence within `[0, 1]`.
//! - Output with surrounding prose is rejected, never scraped.

pub mod command;

use crate::exec::ExecError;
use crate::model::category::CategorySet;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use command::CommandClassifier;

pub type ClassifierResult<T> = Result<T, ClassifierError>;

#[derive(Debug)]
pub enum ClassifierError {
    Exec(ExecError),
    NonZeroExit { code: Option<i32>, stderr: String },
    InvalidOutput(String),
}

impl Display for ClassifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exec(err) => write!(f, "{err}"),
            Self::NonZeroExit { code, stderr } => {
                write!(f, "classifier exited with {code:?}: {stderr}")
            }
            Self::InvalidOutput(message) => write!(f, "invalid classifier output: {message}"),
        }
    }
}

impl Error for ClassifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exec(err) => Some(err),
            Self::NonZeroExit { .. } | Self::InvalidOutput(_) => None,
        }
    }
}

impl From<ExecError> for ClassifierError {
    fn from(value: ExecError) -> Self {
        Self::Exec(value)
    }
}

/// Parsed classifier verdict.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    /// Suggested title for the filed copy.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// External natural-language classifier.
pub trait Classifier {
    fn classify(&self, text: &str, categories: &CategorySet) -> ClassifierResult<Classification>;
}

/// Parses classifier stdout. Only surrounding whitespace is tolerated.
pub fn parse_classification(raw: &str) -> ClassifierResult<Classification> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err(ClassifierError::InvalidOutput(
            "expected a single JSON object".to_string(),
        ));
    }

    let mut parsed: Classification = serde_json::from_str(trimmed)
        .map_err(|err| ClassifierError::InvalidOutput(err.to_string()))?;

    parsed.category = parsed.category.trim().to_ascii_lowercase();
    if parsed.category.is_empty() {
        return Err(ClassifierError::InvalidOutput(
            "category is empty".to_string(),
        ));
    }
    if !parsed.confidence.is_finite() || !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(ClassifierError::InvalidOutput(format!(
            "confidence {} is outside [0, 1]",
            parsed.confidence
        )));
    }
    parsed.name = parsed.name.trim().to_string();
    parsed.tags.retain(|tag| !tag.trim().is_empty());
    parsed.reason = parsed
        .reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());
    Ok(parsed)
}

/// Builds the classifier prompt: ordered categories, the capture, and the
/// output contract.
pub fn build_prompt(text: &str, categories: &CategorySet) -> String {
    let mut prompt = String::from(
        "Classify the following captured note into exactly one category.\n\nCategories:\n",
    );
    for def in categories.iter() {
        prompt.push_str(&format!("- {}: {}\n", def.name, def.description));
    }
    prompt.push_str(
        "\nIf none fits or you are unsure, use the category \"needs_review\" and explain why in \"reason\".\n\
         \nRespond with ONLY a JSON object, no prose and no code fences:\n\
         {\"category\": \"<name>\", \"confidence\": <0.0-1.0>, \"name\": \"<short title>\", \"tags\": [\"...\"], \"reason\": \"<optional>\"}\n\
         \nNote:\n",
    );
    prompt.push_str(text.trim());
    prompt.push('\n');
    prompt
}
