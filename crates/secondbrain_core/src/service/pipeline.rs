//! One run-to-completion batch over all components.
//!
//! # Responsibility
//! - Sequence ingest, settle delay, routing, corrections and notifications.
//! - Isolate phase failures so one failing phase does not stop the others.
//! - Write one audit entry per phase that did something.
//!
//! # Invariants
//! - The only fatal error is an unreadable holding area.
//! - Confirmations read only rows appended after the cursor baseline.

use crate::audit::AuditLog;
use crate::checkpoint::CheckpointStore;
use crate::classifier::Classifier;
use crate::config::Settings;
use crate::service::activity_log::ActivityLog;
use crate::service::correction_service::CorrectionService;
use crate::service::ingest_service::{IngestReport, IngestService};
use crate::service::notify_service::NotifyService;
use crate::service::outcome::BatchSummary;
use crate::service::router_service::RouterService;
use crate::store::{ItemStore, StoreError};
use crate::transport::{MessageSender, Transport};
use log::{error, info, warn};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::thread;

const AUDIT_SKILL_CAPTURE: &str = "capture";
const AUDIT_SKILL_PROCESS: &str = "process_inbox";

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug)]
pub enum PipelineError {
    /// Holding area missing and not creatable, or not listable.
    HoldingUnreadable(StoreError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HoldingUnreadable(err) => write!(f, "holding area unreadable: {err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::HoldingUnreadable(err) => Some(err),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub ingest: Option<IngestReport>,
    /// Routing, correction and notification outcomes.
    pub summary: BatchSummary,
    /// Non-fatal phase failures, e.g. transport unavailable.
    pub phase_errors: Vec<String>,
}

/// Batch runner wired to concrete collaborators.
pub struct Pipeline<'a, S, T, M, C>
where
    S: ItemStore + ?Sized,
    T: Transport + ?Sized,
    M: MessageSender + ?Sized,
    C: Classifier + ?Sized,
{
    settings: &'a Settings,
    store: &'a S,
    transport: &'a T,
    sender: &'a M,
    classifier: &'a C,
    activity_log: ActivityLog,
    checkpoint: CheckpointStore,
    log_cursor: CheckpointStore,
    audit: AuditLog,
}

impl<'a, S, T, M, C> Pipeline<'a, S, T, M, C>
where
    S: ItemStore + ?Sized,
    T: Transport + ?Sized,
    M: MessageSender + ?Sized,
    C: Classifier + ?Sized,
{
    /// Wires collaborators; state files live under `settings.paths.state_dir`.
    pub fn new(
        settings: &'a Settings,
        store: &'a S,
        transport: &'a T,
        sender: &'a M,
        classifier: &'a C,
    ) -> Self {
        Self {
            settings,
            store,
            transport,
            sender,
            classifier,
            activity_log: ActivityLog::new(settings.activity_log_path()),
            checkpoint: CheckpointStore::transport(&settings.paths.state_dir),
            log_cursor: CheckpointStore::log_cursor(&settings.paths.state_dir),
            audit: AuditLog::new(&settings.paths.audit_dir),
        }
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.activity_log
    }

    /// Full cycle: ingest, settle, process, notify.
    pub fn run_cycle(&self) -> PipelineResult<CycleReport> {
        let mut report = CycleReport::default();
        self.ingest_into(&mut report);
        self.process_into(&mut report)?;
        self.finish("run", &report);
        Ok(report)
    }

    /// Ingest phase only.
    pub fn ingest_only(&self) -> PipelineResult<CycleReport> {
        let mut report = CycleReport::default();
        self.ingest_into(&mut report);
        self.finish("capture", &report);
        Ok(report)
    }

    /// Settle, route, apply corrections and notify; no transport polling.
    pub fn process_only(&self) -> PipelineResult<CycleReport> {
        let mut report = CycleReport::default();
        self.process_into(&mut report)?;
        self.finish("process", &report);
        Ok(report)
    }

    /// Notifications only.
    pub fn notify_only(&self) -> PipelineResult<CycleReport> {
        let mut report = CycleReport::default();
        let notifier = self.notifier();
        if let Err(err) = notifier.ensure_cursor() {
            report.phase_errors.push(format!("notify: {err}"));
        }
        self.notify_into(&mut report);
        self.finish("notify", &report);
        Ok(report)
    }

    fn ingest_into(&self, report: &mut CycleReport) {
        let ingest = IngestService::new(
            self.store,
            self.transport,
            &self.checkpoint,
            &self.settings.categories,
        );
        match ingest.ingest() {
            Ok(ingested) => {
                self.audit_phase(
                    AUDIT_SKILL_CAPTURE,
                    "ingest",
                    &ingested.summary,
                    json!({
                        "fetched": ingested.fetched,
                        "captured": ingested.summary.captured,
                        "duplicates": ingested.summary.duplicates,
                        "ignored": ingested.summary.ignored,
                        "deferred": ingested.summary.deferred,
                    }),
                );
                report.ingest = Some(ingested);
            }
            Err(err) => {
                error!("event=ingest module=pipeline status=error error={err}");
                report.phase_errors.push(format!("ingest: {err}"));
            }
        }
    }

    fn process_into(&self, report: &mut CycleReport) -> PipelineResult<()> {
        let holding = self.settings.inbox_dir();
        fs::create_dir_all(&holding).map_err(|source| {
            PipelineError::HoldingUnreadable(StoreError::Io {
                path: holding.clone(),
                source,
            })
        })?;

        let notifier = self.notifier();
        if let Err(err) = notifier.ensure_cursor() {
            warn!("event=notify_cursor module=pipeline status=error error={err}");
            report.phase_errors.push(format!("notify: {err}"));
        }

        let settle = self.settings.routing.settle_delay();
        if !settle.is_zero() {
            info!(
                "event=settle_delay module=pipeline status=wait secs={}",
                settle.as_secs()
            );
            thread::sleep(settle);
        }

        let router = RouterService::new(
            self.store,
            self.classifier,
            &self.activity_log,
            &self.settings.categories,
            self.settings.routing.confidence_threshold,
        );
        let routed = router
            .route_pending()
            .map_err(PipelineError::HoldingUnreadable)?;
        self.audit_phase(
            AUDIT_SKILL_PROCESS,
            "route",
            &routed,
            json!({
                "filed": routed.filed,
                "needs_review": routed.needs_review,
                "skipped_empty": routed.skipped_empty,
                "deferred": routed.deferred,
                "corrupt": routed.corrupt,
            }),
        );
        report.summary.merge(routed);

        let corrections = CorrectionService::new(
            self.store,
            self.transport,
            &self.activity_log,
            &self.settings.categories,
        );
        let applied = corrections
            .apply_pending()
            .map_err(PipelineError::HoldingUnreadable)?;
        self.audit_phase(
            AUDIT_SKILL_PROCESS,
            "corrections",
            &applied,
            json!({
                "fixed": applied.fixed,
                "unresolved": applied.unresolved,
                "deferred": applied.deferred,
            }),
        );
        report.summary.merge(applied);

        self.notify_into(report);
        Ok(())
    }

    fn notify_into(&self, report: &mut CycleReport) {
        let notifier = self.notifier();
        let feedback = &self.settings.feedback;
        let mut notified = BatchSummary::default();

        let confirmations = if feedback.confirmations {
            notifier.send_confirmations()
        } else {
            notifier.skip_confirmations().map(|()| BatchSummary::default())
        };
        match confirmations {
            Ok(summary) => notified.merge(summary),
            Err(err) => {
                error!("event=send_confirmations module=pipeline status=error error={err}");
                report.phase_errors.push(format!("confirmations: {err}"));
            }
        }

        if feedback.enabled {
            match notifier.send_feedback_requests() {
                Ok(summary) => notified.merge(summary),
                Err(err) => {
                    error!("event=send_feedback module=pipeline status=error error={err}");
                    report.phase_errors.push(format!("feedback: {err}"));
                }
            }
        }

        self.audit_phase(
            AUDIT_SKILL_PROCESS,
            "notify",
            &notified,
            json!({
                "sent": notified.notified,
                "deferred": notified.deferred,
            }),
        );
        report.summary.merge(notified);
    }

    fn notifier(&self) -> NotifyService<'_, S, M> {
        NotifyService::new(
            self.store,
            self.sender,
            &self.activity_log,
            &self.log_cursor,
            &self.settings.categories,
            self.settings.recipient(),
        )
    }

    fn audit_phase(&self, skill: &str, operation: &str, summary: &BatchSummary, details: Value) {
        if summary.is_empty() {
            return;
        }
        if let Err(err) = self.audit.record(skill, operation, details) {
            warn!(
                "event=audit_record module=pipeline status=error operation={operation} error={err}"
            );
        }
    }

    fn finish(&self, command: &str, report: &CycleReport) {
        info!(
            "event=cycle_done module=pipeline status={} command={command} {} phase_errors={}",
            if report.phase_errors.is_empty() { "ok" } else { "partial" },
            report.summary,
            report.phase_errors.len()
        );
    }
}
