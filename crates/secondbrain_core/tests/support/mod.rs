//! In-memory collaborators for integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use secondbrain_core::classifier::{Classification, Classifier, ClassifierError, ClassifierResult};
use secondbrain_core::model::category::{CategoryDef, CategorySet};
use secondbrain_core::store::{FiledLocation, LoadOutcome, StoreResult, StoredItem};
use secondbrain_core::transport::{
    InboundMessage, MessageSender, RawMessage, Transport, TransportError, TransportResult,
};
use secondbrain_core::{FsItemStore, Item, ItemStore, Settings, StoreError};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const RECIPIENT: &str = "+15550100";

/// Temp vault plus settings rooted in it.
pub fn vault() -> (TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::for_vault(dir.path());
    settings.handles = vec![RECIPIENT.to_string()];
    (dir, settings)
}

pub fn at(ts: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap() + chrono::Duration::seconds(ts)
}

pub fn message(id: &str, ts: i64, text: &str, parent: Option<&str>) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        timestamp: ts,
        sent_at: at(ts),
        text: Some(text.to_string()),
        parent_id: parent.map(str::to_string),
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub messages: RefCell<Vec<InboundMessage>>,
    pub raw: RefCell<HashMap<String, RawMessage>>,
    pub fail_fetch: Cell<bool>,
}

impl FakeTransport {
    pub fn push(&self, message: InboundMessage) {
        self.raw.borrow_mut().insert(
            message.id.clone(),
            RawMessage {
                id: message.id.clone(),
                text: message.text.clone(),
                encoded_body: None,
            },
        );
        self.messages.borrow_mut().push(message);
    }

    /// Registers an outbound message the transport can look up but that is
    /// not returned by polling.
    pub fn remember(&self, raw: RawMessage) {
        self.raw.borrow_mut().insert(raw.id.clone(), raw);
    }
}

impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "imessage"
    }

    fn fetch_since(&self, checkpoint: Option<i64>) -> TransportResult<Vec<InboundMessage>> {
        if self.fail_fetch.get() {
            return Err(TransportError::InvalidData("chat.db locked".to_string()));
        }
        let mut fresh = self
            .messages
            .borrow()
            .iter()
            .filter(|message| checkpoint.map_or(true, |value| message.timestamp > value))
            .cloned()
            .collect::<Vec<_>>();
        fresh.sort_by_key(|message| message.timestamp);
        Ok(fresh)
    }

    fn fetch_message(&self, id: &str) -> TransportResult<Option<RawMessage>> {
        Ok(self.raw.borrow().get(id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: RefCell<Vec<(String, String)>>,
    pub fail: Cell<bool>,
}

impl RecordingSender {
    pub fn texts(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(_, text)| text.clone()).collect()
    }
}

impl MessageSender for RecordingSender {
    fn send(&self, recipient: &str, text: &str) -> TransportResult<()> {
        if self.fail.get() {
            return Err(TransportError::SendFailed {
                recipient: recipient.to_string(),
                message: "Messages not running".to_string(),
            });
        }
        self.sent
            .borrow_mut()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

/// Returns a fixed verdict per capture body; unknown bodies fail.
#[derive(Default)]
pub struct ScriptedClassifier {
    pub verdicts: RefCell<HashMap<String, Classification>>,
    pub calls: Cell<usize>,
}

impl ScriptedClassifier {
    pub fn answer(&self, body: &str, category: &str, confidence: f64, name: &str) {
        self.verdicts.borrow_mut().insert(
            body.to_string(),
            Classification {
                category: category.to_string(),
                confidence,
                name: name.to_string(),
                tags: Vec::new(),
                reason: (category == "needs_review").then(|| "ambiguous".to_string()),
            },
        );
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, text: &str, _categories: &CategorySet) -> ClassifierResult<Classification> {
        self.calls.set(self.calls.get() + 1);
        self.verdicts
            .borrow()
            .get(text.trim())
            .cloned()
            .ok_or_else(|| ClassifierError::InvalidOutput("no verdict scripted".to_string()))
    }
}

/// Vault store whose pending writes fail for one chosen id.
pub struct FlakyStore {
    pub inner: FsItemStore,
    pub fail_id: RefCell<Option<String>>,
}

impl FlakyStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            inner: FsItemStore::new(settings),
            fail_id: RefCell::new(None),
        }
    }
}

impl ItemStore for FlakyStore {
    fn list_holding(&self) -> StoreResult<Vec<LoadOutcome>> {
        self.inner.list_holding()
    }

    fn list_archive(&self) -> StoreResult<Vec<LoadOutcome>> {
        self.inner.list_archive()
    }

    fn contains(&self, id: &str) -> StoreResult<bool> {
        self.inner.contains(id)
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredItem>> {
        self.inner.find_by_id(id)
    }

    fn find_most_recent_capture_before(
        &self,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StoredItem>> {
        self.inner.find_most_recent_capture_before(at)
    }

    fn write_pending(&self, item: &Item) -> StoreResult<PathBuf> {
        if self.fail_id.borrow().as_deref() == Some(item.id.as_str()) {
            return Err(StoreError::Io {
                path: self.inner.holding_dir().to_path_buf(),
                source: io::Error::other("disk full"),
            });
        }
        self.inner.write_pending(item)
    }

    fn update(&self, stored: &StoredItem, item: &Item) -> StoreResult<()> {
        self.inner.update(stored, item)
    }

    fn file_item(
        &self,
        stored: &StoredItem,
        item: &Item,
        category: &CategoryDef,
    ) -> StoreResult<FiledLocation> {
        self.inner.file_item(stored, item, category)
    }

    fn delete(&self, path: &Path) -> StoreResult<()> {
        self.inner.delete(path)
    }
}

pub fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "md"))
        .collect::<Vec<_>>();
    files.sort();
    files
}
