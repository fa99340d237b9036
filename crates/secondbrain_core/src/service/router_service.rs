//! Classification router: pending captures into filed or held items.
//!
//! # Responsibility
//! - Classify every pending capture in the holding area.
//! - Apply the confidence gate.
//! - File accepted items and record every decision in the activity log.
//!
//! # Invariants
//! - A classifier failure leaves the item untouched for the next cycle.
//! - Held items stay in the holding area with `needs_review: true`.
//! - The pending copy is deleted only after archive and destination exist.

use crate::classifier::{Classification, Classifier};
use crate::model::category::{CategoryDef, CategorySet, NEEDS_REVIEW};
use crate::model::item::{Item, ItemKind, ItemState};
use crate::service::activity_log::{ActivityLog, LogRow, RowStatus};
use crate::service::outcome::{BatchSummary, ItemOutcome};
use crate::store::{FiledLocation, ItemStore, LoadOutcome, StoreResult, StoredItem};
use chrono::Local;
use log::{info, warn};

/// Confidence gate verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision<'c> {
    File(&'c CategoryDef),
    NeedsReview,
}

/// Files only recognized categories at or above `threshold`.
pub fn gate<'c>(
    classification: &Classification,
    categories: &'c CategorySet,
    threshold: f64,
) -> GateDecision<'c> {
    if classification.confidence < threshold {
        return GateDecision::NeedsReview;
    }
    match categories.get(&classification.category) {
        Some(def) => GateDecision::File(def),
        None => GateDecision::NeedsReview,
    }
}

/// Filing plus its activity log row; shared by routing and corrections.
pub(crate) struct Filer<'a, S: ItemStore + ?Sized> {
    pub(crate) store: &'a S,
    pub(crate) activity_log: &'a ActivityLog,
}

impl<S: ItemStore + ?Sized> Filer<'_, S> {
    pub(crate) fn file(
        &self,
        stored: &StoredItem,
        item: &Item,
        category: &CategoryDef,
        status: RowStatus,
    ) -> StoreResult<FiledLocation> {
        let location = self.store.file_item(stored, item, category)?;
        self.log(
            &item.body,
            &category.name,
            Some(&location.destination),
            status,
        );
        Ok(location)
    }

    /// Log append failures are reported but never undo a completed write.
    pub(crate) fn log(
        &self,
        original: &str,
        category: &str,
        destination: Option<&str>,
        status: RowStatus,
    ) {
        let now = Local::now();
        let row = LogRow::new(now, original, category, destination, status);
        if let Err(err) = self.activity_log.append(&row, now.date_naive()) {
            warn!(
                "event=activity_log_append module=router status=error row_status={} error={}",
                status.as_str(),
                err
            );
        }
    }
}

/// Routing use-case over an item store and a classifier.
pub struct RouterService<'a, S: ItemStore + ?Sized, C: Classifier + ?Sized> {
    filer: Filer<'a, S>,
    classifier: &'a C,
    categories: &'a CategorySet,
    threshold: f64,
}

impl<'a, S: ItemStore + ?Sized, C: Classifier + ?Sized> RouterService<'a, S, C> {
    pub fn new(
        store: &'a S,
        classifier: &'a C,
        activity_log: &'a ActivityLog,
        categories: &'a CategorySet,
        threshold: f64,
    ) -> Self {
        Self {
            filer: Filer {
                store,
                activity_log,
            },
            classifier,
            categories,
            threshold,
        }
    }

    /// Routes every pending capture in the holding area.
    ///
    /// # Errors
    /// Only when the holding area itself cannot be listed.
    pub fn route_pending(&self) -> StoreResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        for outcome in self.filer.store.list_holding()? {
            match outcome {
                LoadOutcome::Corrupt { path, error } => {
                    warn!(
                        "event=route_item module=router status=corrupt path={} error={}",
                        path.display(),
                        error
                    );
                    summary.record(ItemOutcome::Corrupt {
                        path,
                        reason: error.to_string(),
                    });
                }
                LoadOutcome::Loaded(stored) if stored.item.is_pending_capture() => {
                    summary.record(self.route_one(&stored));
                }
                LoadOutcome::Loaded(_) => {}
            }
        }
        info!("event=route_pending module=router status=ok {}", summary);
        Ok(summary)
    }

    fn route_one(&self, stored: &StoredItem) -> ItemOutcome {
        let id = stored.item.id.clone();
        if stored.item.body.trim().is_empty() {
            info!("event=route_item module=router status=skip reason=empty_body id={id}");
            return ItemOutcome::SkippedEmpty { id };
        }

        let classification = match self.classifier.classify(&stored.item.body, self.categories) {
            Ok(classification) => classification,
            Err(err) => {
                warn!(
                    "event=route_item module=router status=deferred stage=classify id={id} \
                     error={err}"
                );
                return ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                };
            }
        };

        match gate(&classification, self.categories, self.threshold) {
            GateDecision::NeedsReview => self.hold(stored, &classification),
            GateDecision::File(category) => self.file(stored, &classification, category),
        }
    }

    fn hold(&self, stored: &StoredItem, classification: &Classification) -> ItemOutcome {
        let id = stored.item.id.clone();
        let mut held = apply_classification(&stored.item, classification, NEEDS_REVIEW);
        held.state = ItemState::NeedsReview;

        if let Err(err) = self.filer.store.update(stored, &held) {
            warn!("event=route_item module=router status=deferred stage=hold id={id} error={err}");
            return ItemOutcome::Deferred {
                id,
                reason: err.to_string(),
            };
        }
        self.filer
            .log(&held.body, NEEDS_REVIEW, None, RowStatus::NeedsReview);
        info!(
            "event=route_item module=router status=needs_review id={id} suggested={} \
             confidence={:.2}",
            classification.category, classification.confidence
        );
        ItemOutcome::NeedsReview { id }
    }

    fn file(
        &self,
        stored: &StoredItem,
        classification: &Classification,
        category: &CategoryDef,
    ) -> ItemOutcome {
        let id = stored.item.id.clone();
        let item = apply_classification(&stored.item, classification, &category.name);
        match self.filer.file(stored, &item, category, RowStatus::Filed) {
            Ok(location) => {
                info!(
                    "event=route_item module=router status=filed id={id} category={} \
                     confidence={:.2}",
                    category.name, classification.confidence
                );
                ItemOutcome::Filed {
                    id,
                    category: category.name.clone(),
                    destination: location.destination,
                }
            }
            Err(err) => {
                warn!(
                    "event=route_item module=router status=deferred stage=file id={id} error={err}"
                );
                ItemOutcome::Deferred {
                    id,
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn apply_classification(item: &Item, classification: &Classification, category: &str) -> Item {
    let mut updated = item.clone();
    if let ItemKind::Capture(details) = &mut updated.kind {
        details.category = Some(category.to_string());
        details.confidence = Some(classification.confidence);
        details.title = Some(classification.name.clone()).filter(|name| !name.is_empty());
        details.tags = classification.tags.clone();
        details.reason = classification.reason.clone();
    }
    updated
}
