//! Bulk export/import payload.
//!
//! The payload is plain data — every field survives a JSON round trip — so a
//! whole store can be moved between instances (or saved to a file) without
//! either side knowing the other's storage engine. An export produced here
//! always describes *everything*: a `remove` directive that clears each table
//! plus an `insert` list holding every current row. Imports additionally
//! accept selective payloads (delete by key, delete by index, partial
//! inserts) for incremental application.
//!
//! Import is all-or-nothing: identity and version are checked before the
//! write transaction starts, and any failure inside it (including a primary
//! key collision under add-only semantics) discards the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::{Key, KeyPath, StorageEngine};
use crate::store::PersistError;

/// Full bulk-transfer payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub database: DatabaseSpec,
    #[serde(default)]
    pub remove: BTreeMap<String, RemoveSpec>,
    #[serde(default)]
    pub insert: BTreeMap<String, Vec<Value>>,
}

/// Identity and table layout of the exporting store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub name: String,
    pub version: u32,
    pub object_stores: BTreeMap<String, ObjectStoreSpec>,
}

/// One table's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    pub key_path: KeyPath,
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexSpec>,
}

/// One secondary index's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub name: String,
    pub key_path: KeyPath,
    pub multi_entry: bool,
    pub unique: bool,
}

/// Removal directive for one table.
///
/// No fields: clear the whole table. `key` alone: delete those primary keys.
/// `key` + `index`: cursor-scan the named index for each key and delete every
/// matching row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoveSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

/// One key or a list of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySet {
    Many(Vec<Key>),
    One(Key),
}

impl KeySet {
    pub fn as_slice(&self) -> &[Key] {
        match self {
            KeySet::Many(keys) => keys,
            KeySet::One(key) => std::slice::from_ref(key),
        }
    }
}

/// Serialize the entire store: schema plus every row, read from one
/// consistent snapshot.
pub fn export_store(engine: &StorageEngine, name: &str) -> Result<Export, PersistError> {
    let tx = engine.read_txn();
    let mut object_stores = BTreeMap::new();
    let mut remove = BTreeMap::new();
    let mut insert = BTreeMap::new();

    for table in &engine.schema().tables {
        let indexes = table
            .indexes
            .iter()
            .map(|index| {
                (
                    index.name.clone(),
                    IndexSpec {
                        name: index.name.clone(),
                        key_path: index.key_path.clone(),
                        multi_entry: index.multi_entry,
                        unique: index.unique,
                    },
                )
            })
            .collect();
        object_stores.insert(
            table.name.clone(),
            ObjectStoreSpec {
                key_path: table.key_path.clone(),
                auto_increment: table.auto_increment,
                indexes,
            },
        );

        let rows: Vec<Value> = tx
            .scan(&table.name)?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        insert.insert(table.name.clone(), rows);
        // An export is a complete snapshot: importing it replaces the target
        // wholesale, so every table gets a clear-everything directive.
        remove.insert(table.name.clone(), RemoveSpec::default());
    }

    Ok(Export {
        database: DatabaseSpec {
            name: name.to_string(),
            version: engine.schema().version,
            object_stores,
        },
        remove,
        insert,
    })
}

/// Apply a payload to the store: removals first, then add-only inserts, in
/// one atomic write transaction.
///
/// The payload must match the store's identity and schema version exactly;
/// import does not migrate.
pub fn import_store(engine: &StorageEngine, name: &str, data: &Export) -> Result<(), PersistError> {
    if data.database.name != name {
        return Err(PersistError::IncompatibleDatabase {
            expected: name.to_string(),
            found: data.database.name.clone(),
        });
    }
    if data.database.version != engine.schema().version {
        return Err(PersistError::IncompatibleVersion {
            expected: engine.schema().version,
            found: data.database.version,
        });
    }

    let mut tx = engine.write_txn();

    for (table, spec) in &data.remove {
        match (&spec.index, &spec.key) {
            (Some(index), Some(keys)) => {
                for key in keys.as_slice() {
                    tx.delete_index_matches(table, index, key)?;
                }
            }
            (_, Some(keys)) => {
                for key in keys.as_slice() {
                    tx.delete(table, key)?;
                }
            }
            _ => tx.clear(table)?,
        }
    }

    let mut inserted = 0u64;
    for (table, rows) in &data.insert {
        for row in rows {
            tx.add(table, row.clone())?;
            inserted += 1;
        }
    }

    tx.commit()?;
    log::debug!(
        "imported {inserted} rows across {} tables",
        data.insert.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::schema::{self, CHANGES, CONTENTS, DB_NAME, DB_VERSION, INDEX_DOCUMENT, STATES};
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn engine() -> (StorageEngine, TempDir) {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(
            EngineConfig::for_testing(dir.path()),
            schema::migrations(),
            DB_VERSION,
        )
        .unwrap();
        (engine, dir)
    }

    fn seed(engine: &StorageEngine) {
        let mut tx = engine.write_txn();
        tx.put(STATES, json!({"id": "doc-a", "version": "v1"})).unwrap();
        tx.put(CONTENTS, json!({"id": "doc-a", "content": [{"text": "A"}]}))
            .unwrap();
        tx.add(CHANGES, json!({"document": "doc-a", "change": {"type": "insert_text"}}))
            .unwrap();
        tx.add(CHANGES, json!({"document": "doc-a", "change": {"type": "remove_text"}}))
            .unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_export_describes_everything() {
        let (engine, _dir) = engine();
        seed(&engine);

        let export = export_store(&engine, DB_NAME).unwrap();
        assert_eq!(export.database.name, DB_NAME);
        assert_eq!(export.database.version, DB_VERSION);

        let changes = &export.database.object_stores[CHANGES];
        assert!(changes.auto_increment);
        assert_eq!(changes.key_path, KeyPath::from("order"));
        let index = &changes.indexes[INDEX_DOCUMENT];
        assert!(index.multi_entry);
        assert!(!index.unique);

        // Every table is cleared on import, every row re-inserted.
        for table in [STATES, CONTENTS, CHANGES] {
            assert_eq!(export.remove[table], RemoveSpec::default());
        }
        assert_eq!(export.insert[STATES].len(), 1);
        assert_eq!(export.insert[CHANGES].len(), 2);
        // Auto-increment keys were injected into the exported rows.
        assert_eq!(export.insert[CHANGES][0]["order"], json!(1));
    }

    #[test]
    fn test_export_import_moves_store() {
        let (source, _sdir) = engine();
        seed(&source);
        let export = export_store(&source, DB_NAME).unwrap();

        let (target, _tdir) = engine();
        // Pre-existing data in the target is replaced by the full snapshot.
        let mut tx = target.write_txn();
        tx.put(STATES, json!({"id": "old", "version": "v0"})).unwrap();
        tx.commit().unwrap();

        import_store(&target, DB_NAME, &export).unwrap();

        let tx = target.read_txn();
        let states = tx.scan(STATES).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].1["id"], json!("doc-a"));
        assert_eq!(
            tx.count_index(CHANGES, INDEX_DOCUMENT, &Key::text("doc-a")).unwrap(),
            2
        );
    }

    #[test]
    fn test_import_rejects_wrong_name() {
        let (engine, _dir) = engine();
        seed(&engine);
        let mut export = export_store(&engine, DB_NAME).unwrap();
        export.database.name = "someone-else".into();
        export.insert.get_mut(STATES).unwrap().clear();

        let err = import_store(&engine, DB_NAME, &export).unwrap_err();
        assert!(matches!(err, PersistError::IncompatibleDatabase { .. }));
        // Nothing was applied: the seeded state row is still there.
        assert_eq!(engine.read_txn().scan(STATES).unwrap().len(), 1);
    }

    #[test]
    fn test_import_rejects_wrong_version() {
        let (engine, _dir) = engine();
        seed(&engine);
        let mut export = export_store(&engine, DB_NAME).unwrap();
        export.database.version = 2;

        let err = import_store(&engine, DB_NAME, &export).unwrap_err();
        assert!(matches!(
            err,
            PersistError::IncompatibleVersion {
                expected: 1,
                found: 2
            }
        ));
        assert_eq!(engine.read_txn().scan(STATES).unwrap().len(), 1);
    }

    #[test]
    fn test_import_duplicate_key_aborts_atomically() {
        let (engine, _dir) = engine();
        seed(&engine);

        let mut insert = BTreeMap::new();
        insert.insert(
            STATES.to_string(),
            vec![
                json!({"id": "doc-b", "version": "v1"}),
                // Collides with the seeded row: no remove directive ran.
                json!({"id": "doc-a", "version": "v9"}),
            ],
        );
        let data = Export {
            database: DatabaseSpec {
                name: DB_NAME.into(),
                version: DB_VERSION,
                object_stores: BTreeMap::new(),
            },
            remove: BTreeMap::new(),
            insert,
        };

        let err = import_store(&engine, DB_NAME, &data).unwrap_err();
        assert!(matches!(err, PersistError::DuplicateKey(_)));

        // All-or-nothing: doc-b must not have been inserted either.
        let tx = engine.read_txn();
        assert!(tx.get(STATES, &Key::text("doc-b")).unwrap().is_none());
        assert_eq!(
            tx.get(STATES, &Key::text("doc-a")).unwrap().unwrap()["version"],
            json!("v1")
        );
    }

    #[test]
    fn test_import_selective_remove_by_key() {
        let (engine, _dir) = engine();
        seed(&engine);

        let mut remove = BTreeMap::new();
        remove.insert(
            STATES.to_string(),
            RemoveSpec {
                key: Some(KeySet::One(Key::text("doc-a"))),
                index: None,
            },
        );
        let data = Export {
            database: DatabaseSpec {
                name: DB_NAME.into(),
                version: DB_VERSION,
                object_stores: BTreeMap::new(),
            },
            remove,
            insert: BTreeMap::new(),
        };
        import_store(&engine, DB_NAME, &data).unwrap();

        let tx = engine.read_txn();
        assert!(tx.scan(STATES).unwrap().is_empty());
        // Only the named table was touched.
        assert_eq!(tx.scan(CHANGES).unwrap().len(), 2);
    }

    #[test]
    fn test_import_selective_remove_by_index() {
        let (engine, _dir) = engine();
        seed(&engine);
        let mut tx = engine.write_txn();
        tx.add(CHANGES, json!({"document": "doc-b", "change": {}})).unwrap();
        tx.commit().unwrap();

        let mut remove = BTreeMap::new();
        remove.insert(
            CHANGES.to_string(),
            RemoveSpec {
                key: Some(KeySet::Many(vec![Key::text("doc-a")])),
                index: Some(INDEX_DOCUMENT.to_string()),
            },
        );
        let data = Export {
            database: DatabaseSpec {
                name: DB_NAME.into(),
                version: DB_VERSION,
                object_stores: BTreeMap::new(),
            },
            remove,
            insert: BTreeMap::new(),
        };
        import_store(&engine, DB_NAME, &data).unwrap();

        let tx = engine.read_txn();
        assert_eq!(tx.count_index(CHANGES, INDEX_DOCUMENT, &Key::text("doc-a")).unwrap(), 0);
        assert_eq!(tx.count_index(CHANGES, INDEX_DOCUMENT, &Key::text("doc-b")).unwrap(), 1);
    }

    #[test]
    fn test_payload_json_shape() {
        let (engine, _dir) = engine();
        seed(&engine);
        let export = export_store(&engine, DB_NAME).unwrap();

        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["database"]["name"], json!(DB_NAME));
        let changes = &value["database"]["objectStores"][CHANGES];
        assert_eq!(changes["keyPath"], json!("order"));
        assert_eq!(changes["autoIncrement"], json!(true));
        assert_eq!(changes["indexes"][INDEX_DOCUMENT]["multiEntry"], json!(true));
        // An empty remove spec serializes as an empty object.
        assert_eq!(value["remove"][STATES], json!({}));

        let back: Export = serde_json::from_value(value).unwrap();
        assert_eq!(back, export);
    }

    #[test]
    fn test_key_set_accepts_scalar_and_list() {
        let one: KeySet = serde_json::from_value(json!("doc-a")).unwrap();
        assert_eq!(one.as_slice(), &[Key::text("doc-a")]);
        let many: KeySet = serde_json::from_value(json!(["doc-a", 4])).unwrap();
        assert_eq!(many.as_slice(), &[Key::text("doc-a"), Key::Int(4)]);
    }
}
