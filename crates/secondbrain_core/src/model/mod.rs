//! Domain model for captured items and routing categories.
//!
//! # Responsibility
//! - Define canonical data structures used by routing logic.
//! - Keep capture and correction variants explicit instead of a loose map.
//!
//! # Invariants
//! - Every item is identified by the transport message id it came from.

pub mod category;
pub mod item;
