//! Notifier: filing confirmations and feedback requests.
//!
//! # Responsibility
//! - Confirm `Filed` activity log rows appended since the last cursor.
//! - Ask the user about held items that were not yet asked about.
//!
//! # Invariants
//! - `feedback_sent` is written only after the send succeeded.
//! - The confirmation cursor only advances past rows whose send succeeded.
//! - Every outbound message starts with `SYSTEM_PREFIX`, so the ingestor
//!   never captures the system's own messages.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::model::category::CategorySet;
use crate::model::item::{preview_text, Item, ItemState};
use crate::service::activity_log::{ActivityLog, ActivityLogError, RowStatus};
use crate::service::outcome::{BatchSummary, ItemOutcome};
use crate::store::{ItemStore, LoadOutcome, StoreError};
use crate::transport::MessageSender;
use chrono::Utc;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Prefix shared by every message this system sends.
pub const SYSTEM_PREFIX: &str = "[SB";
/// Opening of the embedded item id marker in feedback requests.
pub const MARKER_PREFIX: &str = "[SB:";
const FEEDBACK_PREVIEW_CHARS: usize = 50;
const CONFIRMATION_TITLE_CHARS: usize = 60;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug)]
pub enum NotifyError {
    Cursor(CheckpointError),
    ActivityLog(ActivityLogError),
    Store(StoreError),
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cursor(err) => write!(f, "{err}"),
            Self::ActivityLog(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for NotifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Cursor(err) => Some(err),
            Self::ActivityLog(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<CheckpointError> for NotifyError {
    fn from(value: CheckpointError) -> Self {
        Self::Cursor(value)
    }
}

impl From<ActivityLogError> for NotifyError {
    fn from(value: ActivityLogError) -> Self {
        Self::ActivityLog(value)
    }
}

impl From<StoreError> for NotifyError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// `[SB:<id>] Unclear: "<preview>". Reply: people/projects/...`
pub fn feedback_message(item: &Item, categories: &CategorySet) -> String {
    format!(
        "{MARKER_PREFIX}{}] Unclear: \"{}\". Reply: {}",
        item.id,
        preview_text(&item.body, FEEDBACK_PREVIEW_CHARS),
        categories.reply_hint()
    )
}

/// `[SB] ✅ <category>: <title>`
pub fn confirmation_message(category: &str, title: &str) -> String {
    format!(
        "{SYSTEM_PREFIX}] \u{2705} {category}: {}",
        preview_text(title, CONFIRMATION_TITLE_CHARS)
    )
}

/// Notification use-case.
pub struct NotifyService<'a, S: ItemStore + ?Sized, M: MessageSender + ?Sized> {
    store: &'a S,
    sender: &'a M,
    activity_log: &'a ActivityLog,
    cursor: &'a CheckpointStore,
    categories: &'a CategorySet,
    recipient: Option<&'a str>,
}

impl<'a, S: ItemStore + ?Sized, M: MessageSender + ?Sized> NotifyService<'a, S, M> {
    pub fn new(
        store: &'a S,
        sender: &'a M,
        activity_log: &'a ActivityLog,
        cursor: &'a CheckpointStore,
        categories: &'a CategorySet,
        recipient: Option<&'a str>,
    ) -> Self {
        Self {
            store,
            sender,
            activity_log,
            cursor,
            categories,
            recipient,
        }
    }

    /// Records the current log size as the cursor when none exists yet, so a
    /// first run does not confirm historical rows.
    pub fn ensure_cursor(&self) -> NotifyResult<()> {
        if self.cursor.load()?.is_none() {
            let total = self.activity_log.rows()?.len();
            self.cursor.save(to_cursor(total))?;
            info!("event=notify_cursor module=notify status=initialized rows={total}");
        }
        Ok(())
    }

    /// Skips every row currently in the log without sending anything.
    pub fn skip_confirmations(&self) -> NotifyResult<()> {
        let total = self.activity_log.rows()?.len();
        self.cursor.save(to_cursor(total))?;
        Ok(())
    }

    /// Sends one confirmation per `Filed` row appended since the cursor,
    /// oldest first. Stops at the first failed send.
    pub fn send_confirmations(&self) -> NotifyResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        let Some(recipient) = self.recipient else {
            warn!("event=send_confirmations module=notify status=skip reason=no_recipient");
            return Ok(summary);
        };

        let rows = self.activity_log.rows()?;
        let total = rows.len();
        let seen = self
            .cursor
            .load()?
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(0);
        if total < seen {
            warn!("event=send_confirmations module=notify status=reset cursor={seen} rows={total}");
            self.cursor.save(to_cursor(total))?;
            return Ok(summary);
        }

        let fresh = total - seen;
        let mut confirmed = 0usize;
        // Rows are newest first; walk the fresh slice backwards.
        for row in rows[..fresh].iter().rev() {
            if row.status == RowStatus::Filed {
                let title = row.title().unwrap_or(row.original.as_str());
                let message = confirmation_message(&row.category, title);
                if let Err(err) = self.sender.send(recipient, &message) {
                    warn!(
                        "event=send_confirmation module=notify status=deferred category={} \
                         error={}",
                        row.category, err
                    );
                    summary.record(ItemOutcome::Deferred {
                        id: row.destination.clone(),
                        reason: err.to_string(),
                    });
                    break;
                }
                summary.record(ItemOutcome::Notified {
                    id: row.destination.clone(),
                });
            }
            confirmed += 1;
        }

        self.cursor.save(to_cursor(seen + confirmed))?;
        info!(
            "event=send_confirmations module=notify status=ok fresh_rows={fresh} sent={}",
            summary.notified
        );
        Ok(summary)
    }

    /// Sends one feedback request per held item not yet notified.
    pub fn send_feedback_requests(&self) -> NotifyResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        let Some(recipient) = self.recipient else {
            warn!("event=send_feedback module=notify status=skip reason=no_recipient");
            return Ok(summary);
        };

        for outcome in self.store.list_holding()? {
            let stored = match outcome {
                LoadOutcome::Loaded(stored) => stored,
                LoadOutcome::Corrupt { .. } => continue,
            };
            if stored.item.state != ItemState::NeedsReview || stored.item.notified {
                continue;
            }

            let id = stored.item.id.clone();
            let message = feedback_message(&stored.item, self.categories);
            if let Err(err) = self.sender.send(recipient, &message) {
                warn!("event=send_feedback module=notify status=deferred id={id} error={err}");
                summary.record(ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                });
                continue;
            }

            let mut notified = stored.item.clone();
            notified.notified = true;
            notified.notified_at = Some(Utc::now());
            if let Err(err) = self.store.update(&stored, &notified) {
                // The message went out; a retry may send it once more.
                warn!(
                    "event=send_feedback module=notify status=error stage=mark id={id} error={err}"
                );
                summary.record(ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                });
                continue;
            }
            info!("event=send_feedback module=notify status=ok id={id}");
            summary.record(ItemOutcome::Notified { id });
        }
        Ok(summary)
    }
}

fn to_cursor(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
