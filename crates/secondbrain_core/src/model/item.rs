//! Captured item domain model.
//!
//! # Responsibility
//! - Define the canonical record for one transport message materialized in
//!   the vault.
//! - Keep capture-only and correction-only fields apart via `ItemKind`.
//!
//! # Invariants
//! - `id` is the transport message id and never changes for an item.
//! - A correction item never reaches `ItemState::Filed`; it is consumed.
//! - `confidence`, when present, is within `[0, 1]`.

use chrono::{DateTime, Utc};

/// Transport-assigned message identifier.
pub type TransportId = String;

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Materialized by the ingestor, not yet routed.
    Pending,
    /// Classified below threshold; held in the inbox for the user.
    NeedsReview,
    /// Routed to a category destination.
    Filed,
    /// Processed copy without a live destination.
    Archived,
}

impl ItemState {
    /// Front-matter spelling of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NeedsReview => "needs_review",
            Self::Filed => "filed",
            Self::Archived => "archived",
        }
    }
}

/// Classification fields carried by a capture once routed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureDetails {
    /// Assigned category, or `needs_review`.
    pub category: Option<String>,
    pub confidence: Option<f64>,
    /// Classifier-suggested title.
    pub title: Option<String>,
    pub tags: Vec<String>,
    /// Classifier explanation for a review hold.
    pub reason: Option<String>,
    /// Vault-relative path of the filed copy.
    pub destination: Option<String>,
}

/// Correction-only fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionDetails {
    /// Parsed category intent; `None` when the text named no known category.
    pub target_category: Option<String>,
    /// Raw parent message id for reply-based corrections.
    pub reply_to_id: Option<TransportId>,
}

/// Item variant discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Capture(CaptureDetails),
    Correction(CorrectionDetails),
}

impl ItemKind {
    /// True for `fix:` commands and replies.
    pub fn is_correction(&self) -> bool {
        matches!(self, Self::Correction(_))
    }
}

/// Canonical captured item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: TransportId,
    /// Transport name, e.g. `imessage`.
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub state: ItemState,
    /// Free text after the front matter block.
    pub body: String,
    pub kind: ItemKind,
    /// Whether the feedback request for the current disposition went out.
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Creates a fresh pending capture.
    pub fn capture(
        id: impl Into<TransportId>,
        source: impl Into<String>,
        captured_at: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            captured_at,
            state: ItemState::Pending,
            body: body.into(),
            kind: ItemKind::Capture(CaptureDetails::default()),
            notified: false,
            notified_at: None,
        }
    }

    /// Creates a fresh pending correction.
    pub fn correction(
        id: impl Into<TransportId>,
        source: impl Into<String>,
        captured_at: DateTime<Utc>,
        body: impl Into<String>,
        details: CorrectionDetails,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            captured_at,
            state: ItemState::Pending,
            body: body.into(),
            kind: ItemKind::Correction(details),
            notified: false,
            notified_at: None,
        }
    }

    /// Classification fields, for captures only.
    pub fn capture_details(&self) -> Option<&CaptureDetails> {
        match &self.kind {
            ItemKind::Capture(details) => Some(details),
            ItemKind::Correction(_) => None,
        }
    }

    /// Target fields, for corrections only.
    pub fn correction_details(&self) -> Option<&CorrectionDetails> {
        match &self.kind {
            ItemKind::Correction(details) => Some(details),
            ItemKind::Capture(_) => None,
        }
    }

    /// A capture the router has not looked at yet.
    pub fn is_pending_capture(&self) -> bool {
        self.state == ItemState::Pending && !self.kind.is_correction()
    }

    pub fn is_pending_correction(&self) -> bool {
        self.state == ItemState::Pending && self.kind.is_correction()
    }

    /// Single-line preview of the body capped at `max_chars`.
    pub fn preview(&self, max_chars: usize) -> String {
        preview_text(&self.body, max_chars)
    }
}

/// Collapses newlines and truncates to `max_chars`, appending `...` when cut.
pub fn preview_text(value: &str, max_chars: usize) -> String {
    let single_line = value.replace(['\n', '\r'], " ");
    let trimmed = single_line.trim();
    let mut preview = trimmed.chars().take(max_chars).collect::<String>();
    if trimmed.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}
