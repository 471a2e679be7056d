//! # vellum-persist — local persistence for rich-text documents
//!
//! Keeps in-progress edits alive across reloads and crashes, before they are
//! durably saved anywhere else. A document's durable form is split in two:
//! a base snapshot and an append-only, ordered log of operations; loading
//! reconciles them by deterministic replay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  change batches   ┌────────────────┐
//! │ Editor       │ ────────────────► │ PersistedEditor│── FIFO queue per
//! │ (any impl of │ ◄──────────────── │ (binding)      │   live editor
//! │  the traits) │     restore       └───────┬────────┘
//! └──────────────┘                           │ mark / save / restore
//!                                            ▼
//!                                    ┌────────────────┐
//!                                    │ DocumentStore  │
//!                                    │ PersistStore   │
//!                                    └───────┬────────┘
//!                                            │ tables + indexes + txns
//!                                            ▼
//!                                    ┌────────────────┐
//!                                    │ StorageEngine  │
//!                                    │ (RocksDB)      │
//!                                    └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] — tables, indexes and transactions over RocksDB
//! - [`schema`] — store identity, table layout, migrations
//! - [`store`] — document state store and store-level catalog
//! - [`export`] — bulk export/import payload and application
//! - [`editor`] — editor capability traits and the persisting wrapper
//!
//! This crate is a linkable persistence module: no CLI, no network protocol,
//! no synchronization with other writers.

pub mod editor;
pub mod engine;
pub mod export;
pub mod schema;
pub mod store;

// Re-exports for convenience
pub use editor::{BindingError, Editor, EditorOperation, PersistedEditor, IGNORED_OPERATIONS};
pub use engine::{EngineConfig, EngineError, Key, KeyPath, StorageEngine};
pub use export::Export;
pub use schema::{Change, Content, State, DB_NAME, DB_VERSION};
pub use store::{DocumentStore, PersistError, PersistStore};
