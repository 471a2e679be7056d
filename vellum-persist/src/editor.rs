//! Editor binding: forwards an editor's content changes into the store and
//! rebuilds editor state from storage.
//!
//! The store persists operations without understanding them; the editor
//! applies operations without knowing about persistence. The two capability
//! traits here are the seam: an [`EditorOperation`] only needs a `kind`
//! discriminant and serde support, an [`Editor`] only needs a serialized
//! content tree plus sequential apply.
//!
//! Ordering hazard: `mark`, `save` and `restore` against the same live editor
//! must never interleave — `save` deletes the change log while `mark` appends
//! to it, and `restore` reads content and log as a pair that `save` replaces
//! as a pair. [`PersistedEditor`] therefore funnels every operation for one
//! editor through a fair FIFO mutex: each queued operation runs to completion
//! (or failure) before the next starts, and a failure never cancels the
//! operations queued behind it. Unrelated editors are not serialized against
//! each other.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::{DocumentStore, PersistError};

/// Operations which do not result in meaningful changes to the document.
///
/// Operations that leave content untouched, such as moving the cursor
/// around, are skipped when persisting and therefore absent when restoring.
pub const IGNORED_OPERATIONS: &[&str] = &["set_selection"];

/// An editor operation, opaque to the store.
pub trait EditorOperation: Clone + Serialize + DeserializeOwned + Send + 'static {
    /// Discriminant used for exclusion-list filtering.
    fn kind(&self) -> &str;
}

/// The editable-document capability consumed by the binding.
///
/// `set_content` and `apply` must not emit change notifications: they are
/// used during restore, which replays already-persisted operations.
pub trait Editor: Send {
    type Op: EditorOperation;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current document tree, in its serialized form.
    fn content(&self) -> Value;

    /// Replace the document tree wholesale.
    fn set_content(&mut self, content: Value) -> Result<(), Self::Error>;

    /// Apply one operation to the live tree.
    fn apply(&mut self, op: &Self::Op) -> Result<(), Self::Error>;

    /// Drop undo/redo history, if the editor keeps any.
    fn clear_history(&mut self) {}
}

/// Errors surfaced by the binding.
#[derive(Debug)]
pub enum BindingError<E> {
    /// Store operation failed
    Persist(PersistError),
    /// Editor refused to apply an operation or content tree
    Editor(E),
    /// Operation could not cross the serialization seam
    Codec(serde_json::Error),
}

impl<E: std::error::Error> std::fmt::Display for BindingError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingError::Persist(e) => write!(f, "persistence failed: {e}"),
            BindingError::Editor(e) => write!(f, "editor rejected operation: {e}"),
            BindingError::Codec(e) => write!(f, "operation serialization failed: {e}"),
        }
    }
}

impl<E: std::error::Error> std::error::Error for BindingError<E> {}

impl<E> From<PersistError> for BindingError<E> {
    fn from(e: PersistError) -> Self {
        BindingError::Persist(e)
    }
}

struct BindingState<E: Editor> {
    editor: E,
    document: DocumentStore,
    /// Called when a batch of changes has been persisted, and after restore.
    /// No-op by default. May lag behind further edits; completion of
    /// persistence is only observable through it.
    changes_persisted: Box<dyn FnMut() + Send>,
}

/// An editor wrapped with persistence.
///
/// Clonable handle; clones share the same editor, document and queue.
pub struct PersistedEditor<E: Editor> {
    inner: Arc<Mutex<BindingState<E>>>,
}

impl<E: Editor> Clone for PersistedEditor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Editor> PersistedEditor<E> {
    /// Wrap `editor`, persisting its changes into `document`.
    pub fn new(document: DocumentStore, editor: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BindingState {
                editor,
                document,
                changes_persisted: Box::new(|| {}),
            })),
        }
    }

    /// Install the hook invoked after each persisted batch and after restore.
    pub async fn set_changes_persisted(&self, hook: impl FnMut() + Send + 'static) {
        self.inner.lock().await.changes_persisted = Box::new(hook);
    }

    /// Persist a batch of operations produced by one change notification.
    ///
    /// Selection-only operations are dropped; the rest are marked in their
    /// original order. Invokes the `changes_persisted` hook once the whole
    /// batch is durable.
    pub async fn handle_change(
        &self,
        operations: Vec<E::Op>,
    ) -> Result<(), BindingError<E::Error>> {
        let mut state = self.inner.lock().await;
        for op in &operations {
            if IGNORED_OPERATIONS.contains(&op.kind()) {
                continue;
            }
            let value = serde_json::to_value(op).map_err(BindingError::Codec)?;
            state.document.mark(&value).await?;
        }
        (state.changes_persisted)();
        Ok(())
    }

    /// Persist a batch without awaiting it, like a change-notification hook
    /// would. Completion is observable through `changes_persisted`.
    pub fn spawn_change(&self, operations: Vec<E::Op>) -> tokio::task::JoinHandle<()>
    where
        E: 'static,
        E::Op: Sync,
    {
        let binding = self.clone();
        tokio::spawn(async move {
            if let Err(e) = binding.handle_change(operations).await {
                log::error!("failed to persist change batch: {e}");
            }
        })
    }

    /// Restore the editor to the document's saved state.
    ///
    /// Replaces the live tree with the stored base content, replays every
    /// pending operation in order (without change notifications), clears
    /// undo/redo history, and emits a single `changes_persisted` signal.
    pub async fn restore(&self) -> Result<(), BindingError<E::Error>> {
        let mut state = self.inner.lock().await;
        let (content, operations) = state.document.restore().await?;

        state.editor.set_content(content).map_err(BindingError::Editor)?;
        for value in operations {
            let op: E::Op = serde_json::from_value(value).map_err(BindingError::Codec)?;
            state.editor.apply(&op).map_err(BindingError::Editor)?;
        }
        state.editor.clear_history();
        (state.changes_persisted)();
        Ok(())
    }

    /// Save the editor's current content as the document's new base version.
    pub async fn save(&self, version: &str) -> Result<(), BindingError<E::Error>> {
        let mut state = self.inner.lock().await;
        let content = state.editor.content();
        state.document.save(&content, version).await?;
        Ok(())
    }

    /// Discard the document's saved state.
    pub async fn discard(&self) -> Result<(), BindingError<E::Error>> {
        let mut state = self.inner.lock().await;
        state.document.discard().await?;
        Ok(())
    }

    /// Whether changes have been marked since the last save.
    pub async fn has_changes(&self) -> bool {
        self.inner.lock().await.document.is_dirty()
    }

    /// Run a closure against the wrapped editor.
    pub async fn with_editor<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        let state = self.inner.lock().await;
        f(&state.editor)
    }

    /// Run a closure against the wrapped editor, mutably.
    ///
    /// This is how the owning application edits the live document; the queue
    /// keeps edits from interleaving with an in-flight restore.
    pub async fn with_editor_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let mut state = self.inner.lock().await;
        f(&mut state.editor)
    }
}
