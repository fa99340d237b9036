//! Read-only adapter over the local Messages `chat.db` SQLite store.
//!
//! # Responsibility
//! - Fetch self-addressed messages newer than a checkpoint.
//! - Decode bodies stored only in the `attributedBody` typedstream blob.
//! - Look up one message by guid for correction resolution.
//!
//! # Invariants
//! - The database is opened read-only; this adapter never writes to it.
//! - Checkpoints are Apple-epoch nanoseconds (the `message.date` column).

use crate::transport::{InboundMessage, RawMessage, Transport, TransportError, TransportResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;
const NANOS_PER_SEC: i64 = 1_000_000_000;
const FIRST_RUN_LOOKBACK_SECS: i64 = 3600;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSPORT_NAME: &str = "imessage";
const NSSTRING_MARKER: &[u8] = b"NSString";

const FETCH_SQL_HEAD: &str = "SELECT
    m.guid,
    m.date,
    m.text,
    m.attributedBody,
    m.thread_originator_guid
FROM message m
JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
JOIN chat c ON cmj.chat_id = c.ROWID
WHERE m.date > ?";

/// `chat.db`-backed transport reader.
#[derive(Debug, Clone)]
pub struct ChatDbTransport {
    db_path: PathBuf,
    handles: Vec<String>,
}

impl ChatDbTransport {
    /// Reader for `db_path`, limited to messages from `handles`.
    pub fn new(db_path: impl Into<PathBuf>, handles: Vec<String>) -> Self {
        Self {
            db_path: db_path.into(),
            handles,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> TransportResult<Connection> {
        let started_at = Instant::now();
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            error!(
                "event=chat_db_open module=transport status=error duration_ms={} path={} error={}",
                started_at.elapsed().as_millis(),
                self.db_path.display(),
                err
            );
            TransportError::from(err)
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(
            "event=chat_db_open module=transport status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(conn)
    }
}

impl Transport for ChatDbTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    fn fetch_since(&self, checkpoint: Option<i64>) -> TransportResult<Vec<InboundMessage>> {
        if self.handles.is_empty() {
            warn!("event=chat_db_fetch module=transport status=skip reason=no_handles");
            return Ok(Vec::new());
        }

        let since = checkpoint.unwrap_or_else(|| {
            utc_to_apple(Utc::now() - ChronoDuration::seconds(FIRST_RUN_LOOKBACK_SECS))
        });

        let placeholders = vec!["?"; self.handles.len()].join(", ");
        let sql = format!(
            "{FETCH_SQL_HEAD}
               AND c.chat_identifier IN ({placeholders})
               AND ((m.text IS NOT NULL AND m.text != '') OR m.attributedBody IS NOT NULL)
             ORDER BY m.date ASC, m.ROWID ASC"
        );
        let mut bind_values = vec![Value::Integer(since)];
        bind_values.extend(self.handles.iter().cloned().map(Value::Text));

        let conn = self.open()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut seen = HashSet::new();
        let mut messages = Vec::new();

        while let Some(row) = rows.next()? {
            let id: String = row.get("guid")?;
            if !seen.insert(id.clone()) {
                continue;
            }
            let timestamp: i64 = row.get("date")?;
            let text: Option<String> = row.get("text")?;
            let encoded: Option<Vec<u8>> = row.get("attributedBody")?;
            let parent_id: Option<String> = row.get("thread_originator_guid")?;

            let text = text
                .filter(|value| !value.is_empty())
                .or_else(|| encoded.as_deref().and_then(decode_attributed_body));
            let sent_at = apple_to_utc(timestamp).ok_or_else(|| {
                TransportError::InvalidData(format!("message `{id}` has invalid date {timestamp}"))
            })?;

            messages.push(InboundMessage {
                id,
                timestamp,
                sent_at,
                text,
                parent_id: parent_id.filter(|value| !value.trim().is_empty()),
            });
        }

        info!(
            "event=chat_db_fetch module=transport status=ok since={} count={}",
            since,
            messages.len()
        );
        Ok(messages)
    }

    fn fetch_message(&self, id: &str) -> TransportResult<Option<RawMessage>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT guid, text, attributedBody FROM message WHERE guid = ?1;")?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(RawMessage {
                id: row.get("guid")?,
                text: row
                    .get::<_, Option<String>>("text")?
                    .filter(|value| !value.is_empty()),
                encoded_body: row.get("attributedBody")?,
            }));
        }
        Ok(None)
    }
}

/// Converts an Apple-epoch nanosecond timestamp to UTC.
pub fn apple_to_utc(apple_ns: i64) -> Option<DateTime<Utc>> {
    let secs = apple_ns.div_euclid(NANOS_PER_SEC) + APPLE_EPOCH_OFFSET_SECS;
    let nanos = u32::try_from(apple_ns.rem_euclid(NANOS_PER_SEC)).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Converts UTC to an Apple-epoch nanosecond timestamp.
pub fn utc_to_apple(at: DateTime<Utc>) -> i64 {
    (at.timestamp() - APPLE_EPOCH_OFFSET_SECS) * NANOS_PER_SEC
        + i64::from(at.timestamp_subsec_nanos())
}

/// Extracts the plain string from an `attributedBody` typedstream blob.
///
/// Layout after the `NSString` class name: a short preamble ending in `+`,
/// then a length (one byte, or `0x81` + u16 LE, or `0x82` + u32 LE), then
/// UTF-8 bytes.
pub fn decode_attributed_body(blob: &[u8]) -> Option<String> {
    let class_at = find_subslice(blob, NSSTRING_MARKER)?;
    let rest = blob.get(class_at + NSSTRING_MARKER.len()..)?;
    let plus_at = rest.iter().take(16).position(|byte| *byte == b'+')?;
    let rest = rest.get(plus_at + 1..)?;

    let (len, header) = match *rest.first()? {
        0x81 => {
            let bytes = rest.get(1..3)?;
            (usize::from(u16::from_le_bytes([bytes[0], bytes[1]])), 3)
        }
        0x82 => {
            let bytes = rest.get(1..5)?;
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (usize::try_from(len).ok()?, 5)
        }
        short => (usize::from(short), 1),
    };

    let text = rest.get(header..header + len)?;
    String::from_utf8(text.to_vec())
        .ok()
        .filter(|value| !value.is_empty())
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
