//! Resolves which capture a correction targets.
//!
//! # Responsibility
//! - Map a reply's parent message id to the transport id of the capture the
//!   user meant.
//! - Unwrap one level of indirection when the parent is a feedback request
//!   carrying an `[SB:<id>]` marker.
//!
//! # Invariants
//! - Resolution never writes anything.
//! - A parent without a marker (or unknown to the transport) is its own target.

use crate::transport::chat_db::find_subslice;
use crate::transport::{RawMessage, Transport, TransportResult};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[SB:([^\]\s]+)\]").expect("valid marker regex"));

const MARKER_OPEN: &[u8] = b"[SB:";
const MARKER_CLOSE: u8 = b']';

/// Outcome of resolving a correction target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// A specific transport id.
    Item(String),
    /// No parent: the latest capture sent no later than the correction.
    MostRecent,
}

/// Resolves `parent_id` against `transport`.
///
/// # Errors
/// Returns transport failures unchanged; callers treat them as transient.
pub fn resolve<T: Transport + ?Sized>(
    transport: &T,
    parent_id: Option<&str>,
) -> TransportResult<ResolvedTarget> {
    let Some(parent_id) = parent_id.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(ResolvedTarget::MostRecent);
    };

    let Some(parent) = transport.fetch_message(parent_id)? else {
        debug!(
            "event=resolve_target module=resolver status=parent_missing parent_id={}",
            parent_id
        );
        return Ok(ResolvedTarget::Item(parent_id.to_string()));
    };

    match embedded_id(&parent) {
        Some(original_id) => {
            info!(
                "event=resolve_target module=resolver status=unwrapped parent_id={} target_id={}",
                parent_id, original_id
            );
            Ok(ResolvedTarget::Item(original_id))
        }
        None => Ok(ResolvedTarget::Item(parent_id.to_string())),
    }
}

/// Marker id from the message text, falling back to the raw encoded body.
pub fn embedded_id(message: &RawMessage) -> Option<String> {
    message
        .text
        .as_deref()
        .and_then(extract_embedded_id)
        .or_else(|| {
            message
                .encoded_body
                .as_deref()
                .and_then(extract_embedded_id_from_bytes)
        })
}

/// `[SB:ABC123] Unclear: ...` -> `ABC123`.
pub fn extract_embedded_id(text: &str) -> Option<String> {
    MARKER_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
}

/// Byte-level marker search for bodies only stored in encoded form.
pub fn extract_embedded_id_from_bytes(bytes: &[u8]) -> Option<String> {
    let start = find_subslice(bytes, MARKER_OPEN)? + MARKER_OPEN.len();
    let rest = bytes.get(start..)?;
    let end = rest.iter().position(|byte| *byte == MARKER_CLOSE)?;
    let id = std::str::from_utf8(&rest[..end]).ok()?.trim();
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return None;
    }
    Some(id.to_string())
}
