//! Message ingestor: transport messages into pending items.
//!
//! # Responsibility
//! - Fetch messages newer than the checkpoint, oldest first.
//! - Decide per message: ignore, reply correction, legacy correction, capture.
//! - Materialize each new item once, keyed by transport id.
//! - Advance the checkpoint past everything handled.
//!
//! # Invariants
//! - Re-ingesting an already materialized message writes nothing.
//! - The checkpoint never moves past a message whose item write failed.
//! - Ignored and malformed messages still advance the checkpoint.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::model::category::CategorySet;
use crate::model::item::{CorrectionDetails, Item};
use crate::service::category_parser::{parse_category, parse_fix_command, KeywordTable};
use crate::service::notify_service::SYSTEM_PREFIX;
use crate::service::outcome::{BatchSummary, ItemOutcome};
use crate::store::ItemStore;
use crate::transport::{InboundMessage, Transport, TransportError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type IngestResult<T> = Result<T, IngestError>;

/// Phase-level ingest failure; nothing was materialized.
#[derive(Debug)]
pub enum IngestError {
    Checkpoint(CheckpointError),
    Transport(TransportError),
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checkpoint(err) => write!(f, "{err}"),
            Self::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Checkpoint(err) => Some(err),
            Self::Transport(err) => Some(err),
        }
    }
}

impl From<CheckpointError> for IngestError {
    fn from(value: CheckpointError) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<TransportError> for IngestError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// How one inbound message is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition<'a> {
    /// The system's own outbound notification.
    Ignore,
    /// Inline reply; the parent id is resolved later.
    ReplyCorrection { parent_id: &'a str },
    /// Legacy `fix: <instruction>` message.
    LegacyCorrection { instruction: &'a str },
    Capture,
}

/// Classifies a message. A reply wins over the legacy prefix.
pub fn classify_message<'a>(text: &'a str, parent_id: Option<&'a str>) -> Disposition<'a> {
    if text.trim_start().starts_with(SYSTEM_PREFIX) {
        return Disposition::Ignore;
    }
    if let Some(parent_id) = parent_id.map(str::trim).filter(|value| !value.is_empty()) {
        return Disposition::ReplyCorrection { parent_id };
    }
    if let Some(instruction) = parse_fix_command(text) {
        return Disposition::LegacyCorrection { instruction };
    }
    Disposition::Capture
}

/// Result of one ingest pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub summary: BatchSummary,
    pub fetched: usize,
    pub checkpoint_before: Option<i64>,
    pub checkpoint_after: Option<i64>,
}

/// Ingest use-case over a transport, an item store and a checkpoint.
pub struct IngestService<'a, S: ItemStore + ?Sized, T: Transport + ?Sized> {
    store: &'a S,
    transport: &'a T,
    checkpoint: &'a CheckpointStore,
    categories: &'a CategorySet,
    keywords: KeywordTable,
}

impl<'a, S: ItemStore + ?Sized, T: Transport + ?Sized> IngestService<'a, S, T> {
    pub fn new(
        store: &'a S,
        transport: &'a T,
        checkpoint: &'a CheckpointStore,
        categories: &'a CategorySet,
    ) -> Self {
        Self {
            store,
            transport,
            checkpoint,
            categories,
            keywords: KeywordTable::from_categories(categories),
        }
    }

    /// Runs one ingest pass.
    ///
    /// # Errors
    /// - The checkpoint cannot be read or saved.
    /// - The transport fetch fails (nothing is materialized).
    pub fn ingest(&self) -> IngestResult<IngestReport> {
        let before = self.checkpoint.load()?;
        let messages = self.transport.fetch_since(before)?;
        let mut report = IngestReport {
            fetched: messages.len(),
            checkpoint_before: before,
            checkpoint_after: before,
            ..IngestReport::default()
        };

        let mut newest = before;
        for message in &messages {
            match self.ingest_one(message) {
                Ok(outcome) => {
                    report.summary.record(outcome);
                    newest = Some(newest.map_or(message.timestamp, |value| {
                        value.max(message.timestamp)
                    }));
                }
                Err(reason) => {
                    warn!(
                        "event=ingest_message module=ingest status=deferred id={} error={}",
                        message.id, reason
                    );
                    report.summary.record(ItemOutcome::Deferred {
                        id: message.id.clone(),
                        reason,
                    });
                    // Siblings sharing this timestamp must be fetched again.
                    newest = newest.map(|value| value.min(message.timestamp - 1));
                    break;
                }
            }
        }

        if newest != before {
            if let Some(value) = newest {
                self.checkpoint.save(value)?;
            }
        }
        report.checkpoint_after = newest;

        info!(
            "event=ingest module=ingest status=ok fetched={} {} checkpoint={:?}",
            report.fetched, report.summary, report.checkpoint_after
        );
        Ok(report)
    }

    /// Handles one message. `Err` means a store failure that must stop the
    /// checkpoint from advancing past this message.
    fn ingest_one(&self, message: &InboundMessage) -> Result<ItemOutcome, String> {
        let Some(text) = message
            .text
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            warn!(
                "event=ingest_message module=ingest status=skip reason=undecodable id={}",
                message.id
            );
            return Ok(ItemOutcome::Ignored {
                id: message.id.clone(),
            });
        };

        let disposition = classify_message(text, message.parent_id.as_deref());
        if disposition == Disposition::Ignore {
            return Ok(ItemOutcome::Ignored {
                id: message.id.clone(),
            });
        }

        if self.store.contains(&message.id).map_err(|err| err.to_string())? {
            return Ok(ItemOutcome::Duplicate {
                id: message.id.clone(),
            });
        }

        let item = self.build_item(message, text, &disposition);
        let correction = item.kind.is_correction();
        self.store
            .write_pending(&item)
            .map_err(|err| err.to_string())?;
        info!(
            "event=ingest_message module=ingest status=ok id={} correction={}",
            message.id, correction
        );
        Ok(ItemOutcome::Captured {
            id: message.id.clone(),
            correction,
        })
    }

    fn build_item(&self, message: &InboundMessage, text: &str, disposition: &Disposition) -> Item {
        let source = self.transport.name();
        let (instruction, reply_to_id) = match disposition {
            Disposition::ReplyCorrection { parent_id } => (text, Some(parent_id.to_string())),
            Disposition::LegacyCorrection { instruction } => (*instruction, None),
            Disposition::Capture | Disposition::Ignore => {
                return Item::capture(message.id.clone(), source, message.sent_at, text);
            }
        };

        let target_category = parse_category(instruction, &self.keywords);
        let body = if target_category.is_some() {
            text.to_string()
        } else {
            format!(
                "{text}\n\nNote: Could not determine target category from fix command.\n\
                 Valid categories: {}",
                self.categories.names().join(", ")
            )
        };
        Item::correction(
            message.id.clone(),
            source,
            message.sent_at,
            body,
            CorrectionDetails {
                target_category,
                reply_to_id,
            },
        )
    }
}
