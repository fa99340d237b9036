//! Item store contracts and vault filesystem implementation.
//!
//! # Responsibility
//! - Read and write item files across the three zones (holding, archive,
//!   category destinations).
//! - Provide lookup by transport id and the paired archive/destination write
//!   used by filing.
//!
//! # Invariants
//! - Every write lands through a temp file + rename, so readers never observe
//!   a half-written item.
//! - Filing writes the archive copy and the destination copy together; when
//!   the second write fails the first one is rolled back.
//! - The pending copy is removed only after both filing writes succeeded.

use crate::config::Settings;
use crate::model::category::CategoryDef;
use crate::model::item::{Item, ItemKind, ItemState};
use crate::store::front_matter::{self, FrontMatter, FrontMatterError};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ITEM_EXTENSION: &str = "md";
const SNIPPET_MAX_CHARS: usize = 50;
const TITLE_MAX_CHARS: usize = 80;
const FALLBACK_SNIPPET: &str = "capture";
const MAX_COLLISION_SUFFIX: u32 = 10_000;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error for item persistence.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: io::Error },
    Corrupt { path: PathBuf, source: FrontMatterError },
    /// No free file name could be generated in the destination folder.
    NameExhausted(PathBuf),
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Corrupt { path, source } => {
                write!(f, "corrupt item `{}`: {source}", path.display())
            }
            Self::NameExhausted(path) => {
                write!(f, "no free file name left under `{}`", path.display())
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Corrupt { source, .. } => Some(source),
            Self::NameExhausted(_) => None,
        }
    }
}

/// Where an item file currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    /// Inbox: pending and needs-review items.
    Holding,
    /// Processed area: metadata-rich copies of filed items.
    Archive,
    /// A category folder; holds the public copy.
    Destination(String),
}

/// One decoded item file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub path: PathBuf,
    pub zone: Zone,
    pub item: Item,
    /// Decoded front matter, kept so rewrites preserve foreign keys.
    pub front_matter: FrontMatter,
}

/// Per-file read result; corrupt records are an explicit outcome.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(StoredItem),
    Corrupt { path: PathBuf, error: StoreError },
}

/// Result of filing an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiledLocation {
    /// Absolute path of the public copy.
    pub destination_path: PathBuf,
    /// Vault-relative destination, as recorded in front matter.
    pub destination: String,
    /// Absolute path of the archive copy.
    pub archive_path: PathBuf,
}

/// Repository interface for item files.
pub trait ItemStore {
    /// Lists holding-area items. Fails only when the directory is unreadable.
    fn list_holding(&self) -> StoreResult<Vec<LoadOutcome>>;
    /// Lists archive-area items.
    fn list_archive(&self) -> StoreResult<Vec<LoadOutcome>>;
    /// Whether an item with this id was already materialized (holding or archive).
    fn contains(&self, id: &str) -> StoreResult<bool>;
    /// Searches holding, archive, then every category folder, in that order.
    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredItem>>;
    /// Latest capture across holding and archive captured no later than `at`.
    fn find_most_recent_capture_before(
        &self,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StoredItem>>;
    /// Writes a new pending item into the holding area.
    fn write_pending(&self, item: &Item) -> StoreResult<PathBuf>;
    /// Rewrites an item in place with updated fields.
    fn update(&self, stored: &StoredItem, item: &Item) -> StoreResult<()>;
    /// Files `item` (already carrying its final classification) into `category`.
    fn file_item(
        &self,
        stored: &StoredItem,
        item: &Item,
        category: &CategoryDef,
    ) -> StoreResult<FiledLocation>;
    /// Deletes one item file. Missing files are not an error.
    fn delete(&self, path: &Path) -> StoreResult<()>;
}

/// Vault-backed item store.
#[derive(Debug, Clone)]
pub struct FsItemStore {
    vault: PathBuf,
    holding_dir: PathBuf,
    archive_dir: PathBuf,
    categories: Vec<CategoryDef>,
}

impl FsItemStore {
    /// Store rooted at the configured vault.
    pub fn new(settings: &Settings) -> Self {
        Self {
            vault: settings.paths.vault.clone(),
            holding_dir: settings.inbox_dir(),
            archive_dir: settings.processed_dir(),
            categories: settings.categories.iter().cloned().collect(),
        }
    }

    pub fn holding_dir(&self) -> &Path {
        &self.holding_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Absolute folder for a category.
    pub fn category_dir(&self, category: &CategoryDef) -> PathBuf {
        self.vault.join(&category.folder)
    }

    fn list_zone(&self, dir: &Path, zone: &Zone) -> StoreResult<Vec<LoadOutcome>> {
        let mut outcomes = Vec::new();
        for path in list_markdown_files(dir)? {
            match load_item(&path, zone.clone()) {
                Ok(Some(stored)) => outcomes.push(LoadOutcome::Loaded(stored)),
                Ok(None) => {}
                Err(error) => outcomes.push(LoadOutcome::Corrupt { path, error }),
            }
        }
        Ok(outcomes)
    }

    fn find_in_zone(&self, dir: &Path, zone: &Zone, id: &str) -> StoreResult<Option<StoredItem>> {
        let outcomes = match self.list_zone(dir, zone) {
            Ok(outcomes) => outcomes,
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };
        Ok(outcomes.into_iter().find_map(|outcome| match outcome {
            LoadOutcome::Loaded(stored) if stored.item.id == id => Some(stored),
            _ => None,
        }))
    }

    fn archive_path_for(&self, stored: &StoredItem) -> PathBuf {
        match stored.zone {
            Zone::Archive => stored.path.clone(),
            _ => self.archive_dir.join(file_name_of(&stored.path)),
        }
    }

    /// Previously recorded public copy for this item, if any.
    fn previous_destination(&self, stored: &StoredItem) -> StoreResult<Option<String>> {
        if let Zone::Destination(_) = stored.zone {
            return Ok(Some(self.relative_to_vault(&stored.path)));
        }
        if let Some(destination) = stored
            .item
            .capture_details()
            .and_then(|details| details.destination.clone())
        {
            return Ok(Some(destination));
        }
        let archived = self.find_in_zone(&self.archive_dir, &Zone::Archive, &stored.item.id)?;
        Ok(archived.and_then(|archived| {
            archived
                .item
                .capture_details()
                .and_then(|details| details.destination.clone())
        }))
    }

    fn relative_to_vault(&self, path: &Path) -> String {
        path.strip_prefix(&self.vault)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn choose_destination(
        &self,
        category_dir: &Path,
        title: &str,
        previous: Option<&str>,
    ) -> StoreResult<PathBuf> {
        if let Some(previous) = previous {
            let previous_path = self.vault.join(previous);
            if previous_path.parent() == Some(category_dir) {
                return Ok(previous_path);
            }
        }
        collision_free_path(category_dir, &sanitize_file_stem(title, TITLE_MAX_CHARS))
    }
}

impl ItemStore for FsItemStore {
    fn list_holding(&self) -> StoreResult<Vec<LoadOutcome>> {
        self.list_zone(&self.holding_dir, &Zone::Holding)
    }

    fn list_archive(&self) -> StoreResult<Vec<LoadOutcome>> {
        match self.list_zone(&self.archive_dir, &Zone::Archive) {
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Vec::new())
            }
            other => other,
        }
    }

    fn contains(&self, id: &str) -> StoreResult<bool> {
        Ok(self.find_in_zone(&self.holding_dir, &Zone::Holding, id)?.is_some()
            || self.find_in_zone(&self.archive_dir, &Zone::Archive, id)?.is_some())
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredItem>> {
        if let Some(found) = self.find_in_zone(&self.holding_dir, &Zone::Holding, id)? {
            return Ok(Some(found));
        }
        if let Some(found) = self.find_in_zone(&self.archive_dir, &Zone::Archive, id)? {
            return Ok(Some(found));
        }
        for category in &self.categories {
            let zone = Zone::Destination(category.name.clone());
            if let Some(found) = self.find_in_zone(&self.category_dir(category), &zone, id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn find_most_recent_capture_before(
        &self,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StoredItem>> {
        let mut candidates = self.list_holding()?;
        candidates.extend(self.list_archive()?);
        Ok(candidates
            .into_iter()
            .filter_map(|outcome| match outcome {
                LoadOutcome::Loaded(stored)
                    if !stored.item.kind.is_correction() && stored.item.captured_at <= at =>
                {
                    Some(stored)
                }
                _ => None,
            })
            .max_by_key(|stored| stored.item.captured_at))
    }

    fn write_pending(&self, item: &Item) -> StoreResult<PathBuf> {
        fs::create_dir_all(&self.holding_dir)
            .map_err(|err| StoreError::io(&self.holding_dir, err))?;
        let mut path = self.holding_dir.join(pending_file_name(item));
        if path.exists() {
            let same_item = load_item(&path, Zone::Holding)
                .ok()
                .flatten()
                .is_some_and(|existing| existing.item.id == item.id);
            if !same_item {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| FALLBACK_SNIPPET.to_string());
                path = collision_free_path(&self.holding_dir, &stem)?;
            }
        }
        write_item_file(&path, &front_matter::from_item(item, None), &item.body)?;
        Ok(path)
    }

    fn update(&self, stored: &StoredItem, item: &Item) -> StoreResult<()> {
        let front_matter = front_matter::from_item(item, Some(&stored.front_matter));
        write_item_file(&stored.path, &front_matter, &item.body)
    }

    fn file_item(
        &self,
        stored: &StoredItem,
        item: &Item,
        category: &CategoryDef,
    ) -> StoreResult<FiledLocation> {
        let category_dir = self.category_dir(category);
        fs::create_dir_all(&category_dir).map_err(|err| StoreError::io(&category_dir, err))?;
        fs::create_dir_all(&self.archive_dir)
            .map_err(|err| StoreError::io(&self.archive_dir, err))?;

        let previous = self.previous_destination(stored)?;
        let title = item
            .capture_details()
            .and_then(|details| details.title.clone())
            .unwrap_or_else(|| item.body.clone());
        let destination_path = self.choose_destination(&category_dir, &title, previous.as_deref())?;
        let destination = self.relative_to_vault(&destination_path);

        let mut filed = item.clone();
        filed.state = ItemState::Filed;
        if let ItemKind::Capture(details) = &mut filed.kind {
            details.destination = Some(destination.clone());
            details.category = Some(category.name.clone());
        }

        let archive_path = self.archive_path_for(stored);
        let archive_before = read_optional(&archive_path)?;
        let archive_front_matter = front_matter::from_item(&filed, Some(&stored.front_matter));
        write_item_file(&archive_path, &archive_front_matter, &filed.body)?;

        if let Err(err) = write_atomic(&destination_path, &format!("{}\n", filed.body.trim())) {
            // Roll the archive copy back so no half-filed state is visible.
            let rollback = match archive_before {
                Some(previous_content) => write_atomic(&archive_path, &previous_content),
                None => remove_if_exists(&archive_path),
            };
            if let Err(rollback_err) = rollback {
                warn!(
                    "event=file_item module=store status=error stage=rollback path={} error={}",
                    archive_path.display(),
                    rollback_err
                );
            }
            return Err(err);
        }

        if let Some(previous) = previous {
            let previous_path = self.vault.join(&previous);
            if previous_path != destination_path {
                remove_if_exists(&previous_path)?;
                info!(
                    "event=file_item module=store status=moved id={} from={} to={}",
                    item.id, previous, destination
                );
            }
        }

        if stored.zone == Zone::Holding {
            remove_if_exists(&stored.path)?;
        }

        Ok(FiledLocation {
            destination_path,
            destination,
            archive_path,
        })
    }

    fn delete(&self, path: &Path) -> StoreResult<()> {
        remove_if_exists(path)
    }
}

/// File name for a freshly materialized item.
///
/// Captures use `<timestamp>-<snippet>.md`; corrections use
/// `<timestamp>-fix-command.md`. Both are deterministic for one message.
pub fn pending_file_name(item: &Item) -> String {
    let stamp = timestamp_stem(item.captured_at);
    match item.kind {
        ItemKind::Capture(_) => format!(
            "{stamp}-{}.{ITEM_EXTENSION}",
            sanitize_file_stem(&item.body, SNIPPET_MAX_CHARS)
        ),
        ItemKind::Correction(_) => format!("{stamp}-fix-command.{ITEM_EXTENSION}"),
    }
}

fn timestamp_stem(captured_at: DateTime<Utc>) -> String {
    captured_at.format("%Y-%m-%dT%H%M%S").to_string()
}

/// Safe file stem: first line, alphanumerics plus ` -_`, capped length.
pub fn sanitize_file_stem(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let safe = first_line
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>();
    let capped = safe.trim().chars().take(max_chars).collect::<String>();
    let capped = capped.trim();
    if capped.is_empty() {
        FALLBACK_SNIPPET.to_string()
    } else {
        capped.to_string()
    }
}

/// `<stem>.md`, then `<stem> 2.md`, `<stem> 3.md`, ... until one is free.
pub fn collision_free_path(dir: &Path, stem: &str) -> StoreResult<PathBuf> {
    let first = dir.join(format!("{stem}.{ITEM_EXTENSION}"));
    if !first.exists() {
        return Ok(first);
    }
    for suffix in 2..MAX_COLLISION_SUFFIX {
        let candidate = dir.join(format!("{stem} {suffix}.{ITEM_EXTENSION}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(StoreError::NameExhausted(dir.to_path_buf()))
}

fn list_markdown_files(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| StoreError::io(dir, err))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| StoreError::io(dir, err))?;
        let path = entry.path();
        let is_hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'));
        let is_markdown = path.extension().and_then(|ext| ext.to_str()) == Some(ITEM_EXTENSION);
        if path.is_file() && is_markdown && !is_hidden {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Reads one item file. Files without front matter or without an id are not
/// items (`Ok(None)`) outside the holding and archive zones.
fn load_item(path: &Path, zone: Zone) -> StoreResult<Option<StoredItem>> {
    let content = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    let corrupt = |source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    };

    if let Zone::Destination(_) = zone {
        let (front_matter, body) = front_matter::split_optional(&content).map_err(corrupt)?;
        let Some(front_matter) = front_matter else {
            return Ok(None);
        };
        if front_matter.transport_id.is_none() {
            return Ok(None);
        }
        let item = front_matter::to_item(&front_matter, &body).map_err(corrupt)?;
        return Ok(Some(StoredItem {
            path: path.to_path_buf(),
            zone,
            item,
            front_matter,
        }));
    }

    let (front_matter, body) = front_matter::split(&content).map_err(corrupt)?;
    let item = front_matter::to_item(&front_matter, &body).map_err(corrupt)?;
    Ok(Some(StoredItem {
        path: path.to_path_buf(),
        zone,
        item,
        front_matter,
    }))
}

fn write_item_file(path: &Path, front_matter: &FrontMatter, body: &str) -> StoreResult<()> {
    let content = front_matter::render(front_matter, body).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &content)
}

/// Writes through a hidden sibling temp file and renames into place.
pub(crate) fn write_atomic(path: &Path, content: &str) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    let temp_path = parent.join(format!(".{}.tmp", file_name_of(path)));
    fs::write(&temp_path, content).map_err(|err| StoreError::io(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        StoreError::io(path, err)
    })
}

fn read_optional(path: &Path) -> StoreResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
