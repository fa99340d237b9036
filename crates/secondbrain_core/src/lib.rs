//! Core capture routing for the second brain inbox.
//! This crate is the single source of truth for routing invariants.

pub mod audit;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod exec;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod transport;

pub use audit::{AuditEntry, AuditError, AuditLog};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use classifier::{Classification, Classifier, ClassifierError, CommandClassifier};
pub use config::{load_settings, ConfigError, Settings};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::category::{CategoryDef, CategorySet, NEEDS_REVIEW};
pub use model::item::{Item, ItemKind, ItemState};
pub use service::outcome::{BatchSummary, ItemOutcome};
pub use service::pipeline::{CycleReport, Pipeline, PipelineError};
pub use store::{FsItemStore, ItemStore, StoreError};
pub use transport::{
    ChatDbTransport, InboundMessage, MessageSender, OsascriptSender, RawMessage, Transport,
    TransportError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
