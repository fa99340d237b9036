//! Item file codec: YAML front matter block plus free-text body.
//!
//! # Responsibility
//! - Split raw file content into typed front matter and body.
//! - Render front matter deterministically so rewrites are byte-stable.
//! - Map front matter to and from the `Item` model.
//!
//! # Invariants
//! - Unknown front matter keys survive a read-modify-write cycle.
//! - `render(split(x))` is stable after the first normalization.

use crate::model::item::{CaptureDetails, CorrectionDetails, Item, ItemKind, ItemState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const DELIMITER: &str = "---";
const TYPE_CAPTURE: &str = "capture";
const TYPE_FIX_COMMAND: &str = "fix_command";
const UNKNOWN_CATEGORY: &str = "unknown";

/// Codec failure for one item file.
#[derive(Debug)]
pub enum FrontMatterError {
    MissingOpeningDelimiter,
    MissingClosingDelimiter,
    Yaml(serde_yaml::Error),
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
}

impl Display for FrontMatterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOpeningDelimiter => write!(f, "missing opening `---` delimiter"),
            Self::MissingClosingDelimiter => write!(f, "missing closing `---` delimiter"),
            Self::Yaml(err) => write!(f, "invalid front matter yaml: {err}"),
            Self::MissingField(field) => write!(f, "front matter field `{field}` is required"),
            Self::InvalidField { field, value } => {
                write!(f, "front matter field `{field}` has invalid value `{value}`")
            }
        }
    }
}

impl Error for FrontMatterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for FrontMatterError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// Typed view over the front matter keys the router reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        default,
        rename = "imessage_id",
        alias = "imessage_guid",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_review: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_sent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_sent_at: Option<DateTime<Utc>>,
    /// Keys this crate does not own, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Splits file content into front matter and trimmed body.
///
/// # Errors
/// - Content without a leading `---` line or without a closing `---` line.
/// - Front matter that is not a YAML mapping of the expected shape.
pub fn split(content: &str) -> Result<(FrontMatter, String), FrontMatterError> {
    let normalized = content.replace("\r\n", "\n");
    let Some(rest) = normalized
        .strip_prefix(DELIMITER)
        .and_then(|rest| rest.strip_prefix('\n'))
    else {
        return Err(FrontMatterError::MissingOpeningDelimiter);
    };

    let (yaml, body) = if let Some(body) = rest.strip_prefix("---") {
        ("", body)
    } else {
        let Some(split_at) = rest.find("\n---") else {
            return Err(FrontMatterError::MissingClosingDelimiter);
        };
        (&rest[..split_at], &rest[split_at + 4..])
    };

    let front_matter = if yaml.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str::<FrontMatter>(yaml)?
    };
    Ok((front_matter, body.trim().to_string()))
}

/// Like [`split`], but treats content without any front matter as plain body.
pub fn split_optional(content: &str) -> Result<(Option<FrontMatter>, String), FrontMatterError> {
    match split(content) {
        Ok((front_matter, body)) => Ok((Some(front_matter), body)),
        Err(FrontMatterError::MissingOpeningDelimiter) => Ok((None, content.trim().to_string())),
        Err(err) => Err(err),
    }
}

/// Renders front matter and body into file content.
pub fn render(front_matter: &FrontMatter, body: &str) -> Result<String, FrontMatterError> {
    let yaml = serde_yaml::to_string(front_matter)?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{}\n", body.trim()))
}

/// Builds an `Item` from decoded front matter.
///
/// `processed` marks the record as filed (or archived when no destination is
/// recorded); `needs_review` marks a review hold; anything else is pending.
pub fn to_item(front_matter: &FrontMatter, body: &str) -> Result<Item, FrontMatterError> {
    let id = front_matter
        .transport_id
        .clone()
        .filter(|value| !value.trim().is_empty())
        .ok_or(FrontMatterError::MissingField("imessage_id"))?;
    let captured_at = front_matter
        .captured
        .ok_or(FrontMatterError::MissingField("captured"))?;

    let kind = match front_matter.kind.as_deref().unwrap_or(TYPE_CAPTURE) {
        TYPE_CAPTURE => ItemKind::Capture(CaptureDetails {
            category: front_matter.category.clone(),
            confidence: front_matter.confidence,
            title: front_matter.name.clone(),
            tags: front_matter.tags.clone(),
            reason: front_matter.reason.clone(),
            destination: front_matter.destination.clone(),
        }),
        TYPE_FIX_COMMAND => ItemKind::Correction(CorrectionDetails {
            target_category: front_matter
                .target_category
                .clone()
                .filter(|value| !value.eq_ignore_ascii_case(UNKNOWN_CATEGORY)),
            reply_to_id: front_matter.reply_to_id.clone(),
        }),
        other => {
            return Err(FrontMatterError::InvalidField {
                field: "type",
                value: other.to_string(),
            })
        }
    };

    if let Some(confidence) = front_matter.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(FrontMatterError::InvalidField {
                field: "confidence",
                value: confidence.to_string(),
            });
        }
    }

    let state = if front_matter.processed == Some(true) {
        if front_matter.destination.is_some() {
            ItemState::Filed
        } else {
            ItemState::Archived
        }
    } else if front_matter.needs_review == Some(true) {
        ItemState::NeedsReview
    } else {
        ItemState::Pending
    };

    Ok(Item {
        id,
        source: front_matter.source.clone().unwrap_or_default(),
        captured_at,
        state,
        body: body.to_string(),
        kind,
        notified: front_matter.feedback_sent == Some(true),
        notified_at: front_matter.feedback_sent_at,
    })
}

/// Projects an `Item` onto front matter, keeping `base.extra` keys.
pub fn from_item(item: &Item, base: Option<&FrontMatter>) -> FrontMatter {
    let mut front_matter = FrontMatter {
        extra: base.map(|value| value.extra.clone()).unwrap_or_default(),
        captured: Some(item.captured_at),
        source: Some(item.source.clone()).filter(|value| !value.is_empty()),
        transport_id: Some(item.id.clone()),
        processed: Some(matches!(item.state, ItemState::Filed | ItemState::Archived)),
        ..FrontMatter::default()
    };

    match &item.kind {
        ItemKind::Capture(details) => {
            front_matter.kind = Some(TYPE_CAPTURE.to_string());
            front_matter.category = details.category.clone();
            front_matter.confidence = details.confidence;
            front_matter.name = details.title.clone();
            front_matter.tags = details.tags.clone();
            front_matter.reason = details.reason.clone();
            front_matter.destination = details.destination.clone();
        }
        ItemKind::Correction(details) => {
            front_matter.kind = Some(TYPE_FIX_COMMAND.to_string());
            front_matter.target_category = Some(
                details
                    .target_category
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
            );
            front_matter.reply_to_id = details.reply_to_id.clone();
        }
    }

    if item.state == ItemState::NeedsReview {
        front_matter.needs_review = Some(true);
    }
    if item.notified {
        front_matter.feedback_sent = Some(true);
        front_matter.feedback_sent_at = item.notified_at;
    }
    front_matter
}
