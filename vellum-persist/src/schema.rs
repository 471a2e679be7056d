//! Store identity, table layout, and migrations.
//!
//! Three tables hold a document's durable representation:
//!
//! ```text
//! states    id → { id, version }            last-saved upstream revision
//! contents  id → { id, content }            full document tree at last save
//! changes   order → { order, document, change }
//!           index "document"                operations not yet folded in
//! ```
//!
//! `contents` is kept separate from `states` so that listings and existence
//! checks never deserialize a potentially huge document body. `changes` rows
//! are the only thing written on each edit; `order` is engine-assigned and
//! strictly increasing across all documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{IndexDef, MigrationFn, SchemaBuilder, TableDef};

/// Store identity. Bulk imports refuse payloads for any other name.
pub const DB_NAME: &str = "vellum:persist";
/// Current schema version.
pub const DB_VERSION: u32 = 1;

pub const STATES: &str = "states";
pub const CONTENTS: &str = "contents";
pub const CHANGES: &str = "changes";
/// Non-unique, multi-entry index over `changes.document`.
pub const INDEX_DOCUMENT: &str = "document";

/// State of an opened document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Document's identification
    pub id: String,
    /// Document's version when it was last saved
    pub version: String,
}

/// Content of a document as of its last save, before any changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    /// The full serialized document tree
    pub content: Value,
}

/// A single change to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Replay position, engine-assigned on insert. Absent while a change is
    /// being written; always present on rows read back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
    /// Document this change applies to (indexed)
    pub document: String,
    /// The operation, opaque to the store
    pub change: Value,
}

/// Ordered upgrade steps, indexed by the version each step produces.
///
/// Index 0 is a placeholder that never runs: version 0 is the state of a
/// store before it is first created, so upgrades start at step 1.
pub fn migrations() -> &'static [MigrationFn] {
    &[migrate_placeholder, migrate_v1]
}

fn migrate_placeholder(_: &mut SchemaBuilder) {}

// 0 → 1
fn migrate_v1(schema: &mut SchemaBuilder) {
    schema.create_table(TableDef::new(STATES, "id"));
    schema.create_table(TableDef::new(CONTENTS, "id"));
    schema.create_table(
        TableDef::new(CHANGES, "order")
            .with_auto_increment()
            .with_index(IndexDef::new(INDEX_DOCUMENT, "document").with_multi_entry()),
    );
}
