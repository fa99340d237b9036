//! Messaging transport contracts.
//!
//! # Responsibility
//! - Define what the core needs from a message channel: fetch inbound
//!   messages since a checkpoint, fetch one raw message, send text.
//! - Host the concrete local adapters (Messages chat.db, osascript).
//!
//! # Invariants
//! - `fetch_since` returns messages ordered oldest first.
//! - A message with undecodable text is still returned (with `text = None`)
//!   so the checkpoint can advance past it.

pub mod chat_db;
pub mod osascript;

use crate::exec::ExecError;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use chat_db::ChatDbTransport;
pub use osascript::OsascriptSender;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug)]
pub enum TransportError {
    Sqlite(rusqlite::Error),
    Exec(ExecError),
    SendFailed { recipient: String, message: String },
    InvalidData(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Exec(err) => write!(f, "{err}"),
            Self::SendFailed { recipient, message } => {
                write!(f, "send to `{recipient}` failed: {message}")
            }
            Self::InvalidData(message) => write!(f, "invalid transport data: {message}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Exec(err) => Some(err),
            Self::SendFailed { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for TransportError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<ExecError> for TransportError {
    fn from(value: ExecError) -> Self {
        Self::Exec(value)
    }
}

/// One inbound message as seen by the ingestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Transport-unique message id.
    pub id: String,
    /// Transport checkpoint value for this message.
    pub timestamp: i64,
    pub sent_at: DateTime<Utc>,
    /// `None` when the body could not be decoded.
    pub text: Option<String>,
    /// Id of the message this one replies to.
    pub parent_id: Option<String>,
}

/// Raw stored form of one message, used for marker lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub text: Option<String>,
    /// Alternate encoded body, searched when `text` is absent.
    pub encoded_body: Option<Vec<u8>>,
}

/// Read side of a messaging channel.
pub trait Transport {
    /// Short transport name recorded as item `source`.
    fn name(&self) -> &str;
    /// Messages strictly newer than `checkpoint`, oldest first.
    fn fetch_since(&self, checkpoint: Option<i64>) -> TransportResult<Vec<InboundMessage>>;
    /// One message by id, or `None` when the transport does not know it.
    fn fetch_message(&self, id: &str) -> TransportResult<Option<RawMessage>>;
}

/// Write side of a messaging channel.
pub trait MessageSender {
    fn send(&self, recipient: &str, text: &str) -> TransportResult<()>;
}
