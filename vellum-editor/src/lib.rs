//! # vellum-editor — a minimal rich-text editor
//!
//! The concrete editable-document implementation behind `vellum-persist`'s
//! capability traits: a JSON-shaped node tree, path-addressed operations
//! with strict sequential apply, and the pending-batch bookkeeping a change
//! notification hands to the persistence binding.
//!
//! ```no_run
//! use vellum_editor::{Node, Operation, RichTextEditor};
//! use vellum_persist::{PersistedEditor, PersistStore};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let document = PersistStore::load("manual:intro").await?;
//! let mut editor = RichTextEditor::with_children(vec![Node::element(
//!     "paragraph",
//!     vec![Node::text("Hello")],
//! )]);
//! editor.edit(Operation::InsertText {
//!     path: vec![0, 0],
//!     offset: 5,
//!     text: "!".into(),
//! })?;
//! let batch = editor.take_pending();
//!
//! let persisted = PersistedEditor::new(document, editor);
//! persisted.handle_change(batch).await?;
//! # Ok(())
//! # }
//! ```

pub mod editor;
pub mod node;
pub mod operation;

pub use editor::{EditError, RichTextEditor};
pub use node::{Element, Node, Text};
pub use operation::Operation;
