//! Document state store and store-level catalog.
//!
//! A document's durable representation is a base snapshot plus an ordered
//! log of not-yet-folded operations:
//!
//! ```text
//!              mark            mark            mark
//! Content ◄── change ◄─────── change ◄─────── change
//! (snapshot)   (order=17)      (order=23)      (order=41)
//!
//! save:    fold — delete the log, replace Content and State atomically
//! restore: return (Content, [changes in order]) for the caller to replay
//! ```
//!
//! Per-document state machine:
//!
//! ```text
//! Unknown ──mark──► Dirty ──save──► Clean ──mark──► Dirty
//!    ▲                                │
//!    └──────────── discard ◄──────────┘        (any state)
//! ```
//!
//! `mark` is deliberately cheap — one small row, never touching the content
//! blob — so every editing operation can be persisted as it happens.
//! Overlapping operations against the same live editor are serialized by the
//! editor binding's queue, not here; storage transactions only make each
//! individual operation atomic.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::engine::{EngineConfig, EngineError, Key, StorageEngine};
use crate::export::{self, Export};
use crate::schema::{
    self, Change, Content, State, CHANGES, CONTENTS, DB_NAME, DB_VERSION, INDEX_DOCUMENT, STATES,
};

/// Store-level errors.
#[derive(Debug, Clone)]
pub enum PersistError {
    /// `restore` was called for a document that was never saved
    NotFound(String),
    /// Imported payload belongs to a different store
    IncompatibleDatabase { expected: String, found: String },
    /// Imported payload was produced at a different schema version
    IncompatibleVersion { expected: u32, found: u32 },
    /// Add-only insert collided during import
    DuplicateKey(String),
    /// Underlying engine failure
    Engine(EngineError),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::NotFound(id) => write!(f, "document {id} has never been saved"),
            PersistError::IncompatibleDatabase { expected, found } => write!(
                f,
                "cannot import data for database {found} into potentially incompatible database {expected}"
            ),
            PersistError::IncompatibleVersion { expected, found } => write!(
                f,
                "imported data is in an incompatible format {found} (this database uses {expected})"
            ),
            PersistError::DuplicateKey(key) => write!(f, "import collided on key {key}"),
            PersistError::Engine(e) => write!(f, "storage engine failure: {e}"),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<EngineError> for PersistError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::DuplicateKey { table, key } => {
                PersistError::DuplicateKey(format!("{key} in {table}"))
            }
            other => PersistError::Engine(other),
        }
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, PersistError> {
    serde_json::from_value(row)
        .map_err(|e| PersistError::Engine(EngineError::Deserialize(e.to_string())))
}

/// The one open handle per process.
static STORE: OnceCell<Arc<PersistStore>> = OnceCell::const_new();

/// Management of and access to the persistence store.
pub struct PersistStore {
    engine: Arc<StorageEngine>,
}

impl PersistStore {
    /// Open the process-wide store at the default location.
    ///
    /// The first call opens and migrates the store; every later call returns
    /// the same handle without reopening.
    pub async fn open() -> Result<Arc<PersistStore>, PersistError> {
        let store = STORE
            .get_or_try_init(|| async {
                PersistStore::open_with(EngineConfig::default()).map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Open a store at an explicit location, bypassing the process-wide
    /// handle. For embedders and tests that need isolated stores.
    pub fn open_with(config: EngineConfig) -> Result<PersistStore, PersistError> {
        let engine = StorageEngine::open(config, schema::migrations(), DB_VERSION)?;
        log::debug!("opened persistence store at {}", engine.path().display());
        Ok(PersistStore {
            engine: Arc::new(engine),
        })
    }

    /// Load a document. Convenience wrapper around [`PersistStore::open`] and
    /// [`PersistStore::open_document`].
    pub async fn load(id: &str) -> Result<DocumentStore, PersistError> {
        PersistStore::open().await?.open_document(id).await
    }

    /// Delete the physical store at `path`. Nothing is migrated or opened.
    pub fn delete_store(path: impl AsRef<Path>) -> Result<(), PersistError> {
        StorageEngine::destroy(path)?;
        Ok(())
    }

    /// Open a document, reading its saved state if any.
    pub async fn open_document(&self, id: &str) -> Result<DocumentStore, PersistError> {
        let tx = self.engine.read_txn();
        let mut document = DocumentStore::detached(Arc::clone(&self.engine), id);

        let Some(row) = tx.get(STATES, &Key::text(id))? else {
            return Ok(document);
        };
        let state: State = decode(row)?;
        let pending = tx.count_index(CHANGES, INDEX_DOCUMENT, &Key::text(id))?;
        document.dirty = pending > 0;
        document.version = Some(state.version);
        Ok(document)
    }

    /// Get a list of all documents with local unsaved changes.
    ///
    /// Doubles as opportunistic reclamation: a State row with no pending
    /// changes is a stale marker, so it and its Content row are deleted
    /// instead of being listed.
    pub async fn dirty(&self) -> Result<Vec<State>, PersistError> {
        let mut tx = self.engine.write_txn();
        let mut dirty = Vec::new();
        let mut reclaimed = 0u32;

        for (key, row) in tx.scan(STATES)? {
            let state: State = decode(row)?;
            let pending = tx.count_index(CHANGES, INDEX_DOCUMENT, &Key::text(&state.id))?;
            if pending == 0 {
                tx.delete(STATES, &key)?;
                tx.delete(CONTENTS, &key)?;
                reclaimed += 1;
            } else {
                dirty.push(state);
            }
        }

        tx.commit()?;
        if reclaimed > 0 {
            log::debug!("reclaimed {reclaimed} documents with no pending changes");
        }
        Ok(dirty)
    }

    /// Discard any saved state of a document.
    ///
    /// Same effect as [`DocumentStore::discard`] on a loaded document.
    pub async fn discard(&self, id: &str) -> Result<(), PersistError> {
        DocumentStore::detached(Arc::clone(&self.engine), id)
            .discard()
            .await
    }

    /// Export the store's entire contents as plain data.
    ///
    /// The returned payload survives a JSON round trip and can be fed back
    /// into [`PersistStore::import`] on a compatible store.
    pub async fn export(&self) -> Result<Export, PersistError> {
        export::export_store(&self.engine, DB_NAME)
    }

    /// Import data previously produced by [`PersistStore::export`] (or a
    /// selective payload). All-or-nothing; requires exact identity and
    /// schema-version match.
    pub async fn import(&self, data: &Export) -> Result<(), PersistError> {
        export::import_store(&self.engine, DB_NAME, data)
    }
}

/// Local state of one document.
///
/// Holds the in-memory `dirty`/`version` mirror alongside the document's id;
/// all persisted state lives in the store's three tables.
pub struct DocumentStore {
    engine: Arc<StorageEngine>,
    id: String,
    dirty: bool,
    version: Option<String>,
}

impl DocumentStore {
    fn detached(engine: Arc<StorageEngine>, id: &str) -> Self {
        Self {
            engine,
            id: id.to_string(),
            dirty: false,
            version: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether changes have been marked since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Version tag supplied with the last save, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Save a new version of the document.
    ///
    /// Folds the change log into the new content: every pending change row is
    /// deleted and State/Content are replaced, all in one atomic transaction.
    pub async fn save(&mut self, content: &Value, version: &str) -> Result<(), PersistError> {
        let mut tx = self.engine.write_txn();
        let folded = tx.delete_index_matches(CHANGES, INDEX_DOCUMENT, &Key::text(&self.id))?;
        tx.put(
            STATES,
            serde_json::to_value(State {
                id: self.id.clone(),
                version: version.to_string(),
            })
            .map_err(|e| PersistError::Engine(EngineError::Serialize(e.to_string())))?,
        )?;
        tx.put(CONTENTS, json!({"id": self.id, "content": content}))?;
        tx.commit()?;

        log::debug!(
            "saved document {} at version {version} ({folded} pending changes folded)",
            self.id
        );
        self.version = Some(version.to_string());
        self.dirty = false;
        Ok(())
    }

    /// Mark a change to the document.
    ///
    /// Appends one row to the change log; the engine assigns the replay
    /// position. The content blob is never touched.
    pub async fn mark(&mut self, operation: &Value) -> Result<(), PersistError> {
        let mut tx = self.engine.write_txn();
        tx.add(
            CHANGES,
            json!({"document": self.id, "change": operation}),
        )?;
        tx.commit()?;
        self.dirty = true;
        Ok(())
    }

    /// Read the document's saved state: the base content and every pending
    /// operation, in mark order.
    ///
    /// Operations are *not* applied — replaying them requires the editor's
    /// own apply semantics, which live in the editor binding. Fails with
    /// [`PersistError::NotFound`] if the document was never saved.
    pub async fn restore(&self) -> Result<(Value, Vec<Value>), PersistError> {
        let tx = self.engine.read_txn();
        let row = tx
            .get(CONTENTS, &Key::text(&self.id))?
            .ok_or_else(|| PersistError::NotFound(self.id.clone()))?;
        let content: Content = decode(row)?;

        let mut operations = Vec::new();
        for (_, row) in tx.scan_index(CHANGES, INDEX_DOCUMENT, &Key::text(&self.id))? {
            let change: Change = decode(row)?;
            operations.push(change.change);
        }
        Ok((content.content, operations))
    }

    /// Discard any saved state of the document: change log, State and
    /// Content. Rows that do not exist are not errors.
    pub async fn discard(&mut self) -> Result<(), PersistError> {
        let mut tx = self.engine.write_txn();
        tx.delete_index_matches(CHANGES, INDEX_DOCUMENT, &Key::text(&self.id))?;
        tx.delete(STATES, &Key::text(&self.id))?;
        tx.delete(CONTENTS, &Key::text(&self.id))?;
        tx.commit()?;
        self.dirty = false;
        Ok(())
    }
}
