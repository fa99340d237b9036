//! Correction applier: re-files the target of each pending correction.
//!
//! # Responsibility
//! - Resolve each correction's target and refile it with confidence 1.0.
//! - Log a `Fixed` row and consume the correction item.
//!
//! # Invariants
//! - A correction with no recognized category is never deleted.
//! - A correction whose target cannot be found is never deleted.
//! - The correction file is removed only after the target was refiled.

use crate::model::category::CategorySet;
use crate::model::item::{Item, ItemKind};
use crate::service::activity_log::{ActivityLog, RowStatus};
use crate::service::correction_resolver::{resolve, ResolvedTarget};
use crate::service::outcome::{BatchSummary, ItemOutcome};
use crate::service::router_service::Filer;
use crate::store::{ItemStore, LoadOutcome, StoreResult, StoredItem};
use crate::transport::Transport;
use log::{info, warn};

const CORRECTED_CONFIDENCE: f64 = 1.0;

/// Correction use-case over an item store and the transport (for lookups).
pub struct CorrectionService<'a, S: ItemStore + ?Sized, T: Transport + ?Sized> {
    filer: Filer<'a, S>,
    transport: &'a T,
    categories: &'a CategorySet,
}

impl<'a, S: ItemStore + ?Sized, T: Transport + ?Sized> CorrectionService<'a, S, T> {
    pub fn new(
        store: &'a S,
        transport: &'a T,
        activity_log: &'a ActivityLog,
        categories: &'a CategorySet,
    ) -> Self {
        Self {
            filer: Filer {
                store,
                activity_log,
            },
            transport,
            categories,
        }
    }

    /// Applies every pending correction in the holding area, oldest first.
    ///
    /// # Errors
    /// Only when the holding area itself cannot be listed.
    pub fn apply_pending(&self) -> StoreResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        let mut corrections = Vec::new();
        for outcome in self.filer.store.list_holding()? {
            match outcome {
                LoadOutcome::Loaded(stored) if stored.item.is_pending_correction() => {
                    corrections.push(stored);
                }
                LoadOutcome::Loaded(_) => {}
                // Already reported by the router pass.
                LoadOutcome::Corrupt { .. } => {}
            }
        }
        corrections.sort_by_key(|stored| stored.item.captured_at);

        for correction in &corrections {
            summary.record(self.apply_one(correction));
        }
        info!("event=apply_corrections module=corrections status=ok {}", summary);
        Ok(summary)
    }

    fn apply_one(&self, correction: &StoredItem) -> ItemOutcome {
        let id = correction.item.id.clone();
        let Some(details) = correction.item.correction_details() else {
            return ItemOutcome::Unresolved {
                id,
                reason: "not a correction".to_string(),
            };
        };

        let Some(category) = details
            .target_category
            .as_deref()
            .and_then(|name| self.categories.get(name))
        else {
            info!(
                "event=apply_correction module=corrections status=unresolved \
                 reason=unknown_category id={id}"
            );
            return ItemOutcome::Unresolved {
                id,
                reason: "no recognized category".to_string(),
            };
        };

        let target = match resolve(self.transport, details.reply_to_id.as_deref()) {
            Ok(target) => target,
            Err(err) => {
                warn!(
                    "event=apply_correction module=corrections status=deferred stage=resolve \
                     id={id} error={err}"
                );
                return ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                };
            }
        };

        let found = match &target {
            ResolvedTarget::Item(target_id) => self.filer.store.find_by_id(target_id),
            ResolvedTarget::MostRecent => self
                .filer
                .store
                .find_most_recent_capture_before(correction.item.captured_at),
        };
        let stored_target = match found {
            Ok(Some(stored)) if !stored.item.kind.is_correction() => stored,
            Ok(_) => {
                info!(
                    "event=apply_correction module=corrections status=unresolved \
                     reason=target_missing id={id} target={:?}",
                    target
                );
                return ItemOutcome::Unresolved {
                    id,
                    reason: format!("target {target:?} not found"),
                };
            }
            Err(err) => {
                warn!(
                    "event=apply_correction module=corrections status=deferred stage=lookup \
                     id={id} error={err}"
                );
                return ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                };
            }
        };

        let corrected = corrected_item(&stored_target.item, &category.name);
        if let Err(err) = self
            .filer
            .file(&stored_target, &corrected, category, RowStatus::Fixed)
        {
            warn!(
                "event=apply_correction module=corrections status=deferred stage=file id={id} \
                 error={err}"
            );
            return ItemOutcome::Deferred {
                id,
                reason: err.to_string(),
            };
        }

        if let Err(err) = self.filer.store.delete(&correction.path) {
            warn!(
                "event=apply_correction module=corrections status=deferred stage=delete id={id} \
                 error={err}"
            );
            return ItemOutcome::Deferred {
                id,
                reason: err.to_string(),
            };
        }

        info!(
            "event=apply_correction module=corrections status=fixed id={id} target_id={} \
             category={}",
            stored_target.item.id, category.name
        );
        ItemOutcome::Fixed {
            correction_id: id,
            target_id: stored_target.item.id,
            category: category.name.clone(),
        }
    }
}

/// Target with the user's category and full confidence; review state cleared.
fn corrected_item(target: &Item, category: &str) -> Item {
    let mut corrected = target.clone();
    if let ItemKind::Capture(details) = &mut corrected.kind {
        details.category = Some(category.to_string());
        details.confidence = Some(CORRECTED_CONFIDENCE);
        details.reason = None;
    }
    corrected
}
