//! Per-item outcomes and their batch aggregate.
//!
//! # Invariants
//! - Every item touched by a phase yields exactly one `ItemOutcome`.
//! - Per-item failures are recorded here and never abort the batch.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Result of handling one item in one phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Materialized from the transport.
    Captured { id: String, correction: bool },
    /// Already materialized; nothing written.
    Duplicate { id: String },
    /// Own system message or undecodable body; checkpoint still advances.
    Ignored { id: String },
    Filed {
        id: String,
        category: String,
        destination: String,
    },
    NeedsReview { id: String },
    Fixed {
        correction_id: String,
        target_id: String,
        category: String,
    },
    /// Capture with an empty body, left in place.
    SkippedEmpty { id: String },
    /// Transient failure; retried next cycle with state unchanged.
    Deferred { id: String, reason: String },
    /// Input that needs a human: left pending and visible.
    Unresolved { id: String, reason: String },
    /// Unreadable record skipped for this batch.
    Corrupt { path: PathBuf, reason: String },
    /// A notification went out.
    Notified { id: String },
}

/// Counts per outcome plus the outcomes themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub captured: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub filed: usize,
    pub needs_review: usize,
    pub fixed: usize,
    pub skipped_empty: usize,
    pub deferred: usize,
    pub unresolved: usize,
    pub corrupt: usize,
    pub notified: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchSummary {
    /// Counts one outcome under its kind.
    pub fn record(&mut self, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Captured { .. } => self.captured += 1,
            ItemOutcome::Duplicate { .. } => self.duplicates += 1,
            ItemOutcome::Ignored { .. } => self.ignored += 1,
            ItemOutcome::Filed { .. } => self.filed += 1,
            ItemOutcome::NeedsReview { .. } => self.needs_review += 1,
            ItemOutcome::Fixed { .. } => self.fixed += 1,
            ItemOutcome::SkippedEmpty { .. } => self.skipped_empty += 1,
            ItemOutcome::Deferred { .. } => self.deferred += 1,
            ItemOutcome::Unresolved { .. } => self.unresolved += 1,
            ItemOutcome::Corrupt { .. } => self.corrupt += 1,
            ItemOutcome::Notified { .. } => self.notified += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Adds every counter of `other`.
    pub fn merge(&mut self, other: BatchSummary) {
        for outcome in other.outcomes {
            self.record(outcome);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether anything was left for the next cycle.
    pub fn has_failures(&self) -> bool {
        self.deferred > 0 || self.corrupt > 0
    }
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "captured={} duplicates={} ignored={} filed={} needs_review={} fixed={} \
             skipped_empty={} deferred={} unresolved={} corrupt={} notified={}",
            self.captured,
            self.duplicates,
            self.ignored,
            self.filed,
            self.needs_review,
            self.fixed,
            self.skipped_empty,
            self.deferred,
            self.unresolved,
            self.corrupt,
            self.notified
        )
    }
}
