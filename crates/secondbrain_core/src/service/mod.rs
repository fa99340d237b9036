//! Core use-case services.
//!
//! # Responsibility
//! - Turn transport messages into items and drive items through routing,
//!   correction and notification.
//! - Keep the CLI decoupled from store and transport details.
//!
//! # See also
//! - `pipeline` for the order in which one batch runs the services.

pub mod activity_log;
pub mod category_parser;
pub mod correction_resolver;
pub mod correction_service;
pub mod ingest_service;
pub mod notify_service;
pub mod outcome;
pub mod pipeline;
pub mod router_service;
