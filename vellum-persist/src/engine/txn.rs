//! Read and write transactions.
//!
//! A `ReadTxn` wraps a RocksDB snapshot: every read inside it observes the
//! same committed state, across all tables. A `WriteTxn` accumulates its
//! writes in a `WriteBatch` plus an in-memory overlay; nothing becomes
//! visible until `commit`, which applies the whole batch atomically. The
//! overlay is what lets add-only inserts and remove-then-insert sequences
//! observe their own earlier effects before commit.
//!
//! Transactions provide atomicity *within* one operation. Serializing
//! overlapping operations against the same document is the caller's job
//! (the per-editor queue in the editor binding).

use rocksdb::{Direction, IteratorMode, SnapshotWithThreadMode, WriteBatch, WriteOptions};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::key::Key;
use super::{
    decode_row, encode_row, index_cf_name, index_entries, Db, EngineError, IndexDef, StorageEngine,
};

type Snapshot<'a> = SnapshotWithThreadMode<'a, Db>;

/// Read-only transaction over a consistent snapshot.
pub struct ReadTxn<'a> {
    engine: &'a StorageEngine,
    snap: Snapshot<'a>,
}

impl<'a> ReadTxn<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            snap: engine.db().snapshot(),
        }
    }

    /// Fetch one row by primary key.
    pub fn get(&self, table: &str, key: &Key) -> Result<Option<Value>, EngineError> {
        self.engine.schema().table(table)?;
        let cf = self.engine.cf(table)?;
        match self.snap.get_cf(cf, key.encode())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows of a table, in primary-key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(Key, Value)>, EngineError> {
        self.engine.schema().table(table)?;
        let cf = self.engine.cf(table)?;
        let mut out = Vec::new();
        for entry in self.snap.iterator_cf(cf, IteratorMode::Start) {
            let (k, v) = entry?;
            out.push((Key::decode(&k)?, decode_row(&v)?));
        }
        Ok(out)
    }

    /// All rows whose index value equals `key`, in primary-key order.
    pub fn scan_index(
        &self,
        table: &str,
        index: &str,
        key: &Key,
    ) -> Result<Vec<(Key, Value)>, EngineError> {
        self.engine.schema().table(table)?.index(index)?;
        let prefix = key.encode();
        let icf = self.engine.cf(&index_cf_name(table, index))?;
        let mut out = Vec::new();
        for entry in self
            .snap
            .iterator_cf(icf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (k, _) = entry?;
            if !k.starts_with(&prefix) {
                break;
            }
            let pk = Key::decode(&k[prefix.len()..])?;
            let row = self.get(table, &pk)?.ok_or_else(|| {
                EngineError::Corrupt(format!("index {table}:{index} references a missing row"))
            })?;
            out.push((pk, row));
        }
        Ok(out)
    }

    /// Number of index entries for `key`.
    ///
    /// Cheaper than `scan_index`: rows are never fetched or decoded, which is
    /// the point of keeping bulky content out of the indexed tables.
    pub fn count_index(&self, table: &str, index: &str, key: &Key) -> Result<u64, EngineError> {
        self.engine.schema().table(table)?.index(index)?;
        let prefix = key.encode();
        let icf = self.engine.cf(&index_cf_name(table, index))?;
        let mut count = 0;
        for entry in self
            .snap
            .iterator_cf(icf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (k, _) = entry?;
            if !k.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Default)]
struct TableOverlay {
    /// Whole table cleared earlier in this transaction.
    cleared: bool,
    /// Rows written (`Some`) or deleted (`None`) in this transaction.
    rows: BTreeMap<Vec<u8>, Option<Value>>,
}

/// Read-write transaction. Dropping without `commit` discards every write.
pub struct WriteTxn<'a> {
    engine: &'a StorageEngine,
    snap: Snapshot<'a>,
    batch: WriteBatch,
    overlay: HashMap<String, TableOverlay>,
    sequences_touched: HashSet<String>,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            snap: engine.db().snapshot(),
            batch: WriteBatch::default(),
            overlay: HashMap::new(),
            sequences_touched: HashSet::new(),
        }
    }

    /// Fetch one row, observing this transaction's own writes and deletes.
    pub fn get(&self, table: &str, key: &Key) -> Result<Option<Value>, EngineError> {
        self.engine.schema().table(table)?;
        let kb = key.encode();
        if let Some(overlay) = self.overlay.get(table) {
            if let Some(entry) = overlay.rows.get(&kb) {
                return Ok(entry.clone());
            }
            if overlay.cleared {
                return Ok(None);
            }
        }
        let cf = self.engine.cf(table)?;
        match self.snap.get_cf(cf, &kb)? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a row. Returns the primary key, which is
    /// engine-assigned and injected into the row for auto-increment tables.
    pub fn put(&mut self, table: &str, row: Value) -> Result<Key, EngineError> {
        let engine = self.engine;
        let def = engine.schema().table(table)?;
        let mut row = row;

        let key = match def.key_path.extract(&row) {
            Some(key) => {
                if def.auto_increment {
                    if let Key::Int(n) = key {
                        // Explicit keys (bulk import) advance the sequence so
                        // later generated keys stay above them.
                        engine.bump_past(table, n);
                        self.sequences_touched.insert(table.to_string());
                    }
                }
                key
            }
            None if def.auto_increment => {
                let key = Key::Int(engine.next_key(table)?);
                def.key_path.inject(&mut row, &key);
                self.sequences_touched.insert(table.to_string());
                key
            }
            None => {
                return Err(EngineError::MissingKey {
                    table: table.to_string(),
                })
            }
        };

        let kb = key.encode();
        let old = self.get(table, &key)?;

        for index in &def.indexes {
            if index.unique {
                for entry in index_entries(index, &row) {
                    self.assert_unique(table, index, &entry, &kb)?;
                }
            }
        }

        if let Some(old_row) = &old {
            for index in &def.indexes {
                let icf = engine.cf(&index_cf_name(table, &index.name))?;
                for mut entry in index_entries(index, old_row) {
                    entry.extend_from_slice(&kb);
                    self.batch.delete_cf(icf, entry);
                }
            }
        }
        for index in &def.indexes {
            let icf = engine.cf(&index_cf_name(table, &index.name))?;
            for mut entry in index_entries(index, &row) {
                entry.extend_from_slice(&kb);
                self.batch.put_cf(icf, entry, b"");
            }
        }

        let encoded = encode_row(&row)?;
        self.batch.put_cf(engine.cf(table)?, &kb, encoded);
        self.overlay
            .entry(table.to_string())
            .or_default()
            .rows
            .insert(kb, Some(row));
        Ok(key)
    }

    /// Insert a row, failing if the primary key already exists.
    pub fn add(&mut self, table: &str, row: Value) -> Result<Key, EngineError> {
        let def = self.engine.schema().table(table)?;
        if let Some(key) = def.key_path.extract(&row) {
            if self.get(table, &key)?.is_some() {
                return Err(EngineError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                });
            }
        }
        self.put(table, row)
    }

    /// Delete a row by primary key. A missing row is not an error.
    pub fn delete(&mut self, table: &str, key: &Key) -> Result<(), EngineError> {
        let engine = self.engine;
        let def = engine.schema().table(table)?;
        let Some(old) = self.get(table, key)? else {
            return Ok(());
        };
        let kb = key.encode();
        for index in &def.indexes {
            let icf = engine.cf(&index_cf_name(table, &index.name))?;
            for mut entry in index_entries(index, &old) {
                entry.extend_from_slice(&kb);
                self.batch.delete_cf(icf, entry);
            }
        }
        self.batch.delete_cf(engine.cf(table)?, &kb);
        self.overlay
            .entry(table.to_string())
            .or_default()
            .rows
            .insert(kb, None);
        Ok(())
    }

    /// Delete every row of a table, index entries included.
    pub fn clear(&mut self, table: &str) -> Result<(), EngineError> {
        let engine = self.engine;
        let def = engine.schema().table(table)?;
        let cf = engine.cf(table)?;

        for entry in self.snap.iterator_cf(cf, IteratorMode::Start) {
            let (k, _) = entry?;
            self.batch.delete_cf(cf, k);
        }
        for index in &def.indexes {
            let icf = engine.cf(&index_cf_name(table, &index.name))?;
            for entry in self.snap.iterator_cf(icf, IteratorMode::Start) {
                let (k, _) = entry?;
                self.batch.delete_cf(icf, k);
            }
        }

        // Rows written earlier in this same transaction.
        let overlay = self.overlay.entry(table.to_string()).or_default();
        for (kb, row) in std::mem::take(&mut overlay.rows) {
            if let Some(row) = row {
                self.batch.delete_cf(cf, &kb);
                for index in &def.indexes {
                    let icf = engine.cf(&index_cf_name(table, &index.name))?;
                    for mut entry in index_entries(index, &row) {
                        entry.extend_from_slice(&kb);
                        self.batch.delete_cf(icf, entry);
                    }
                }
            }
        }
        overlay.cleared = true;
        Ok(())
    }

    /// All rows of a table, in primary-key order, observing this
    /// transaction's writes.
    pub fn scan(&self, table: &str) -> Result<Vec<(Key, Value)>, EngineError> {
        self.engine.schema().table(table)?;
        let cf = self.engine.cf(table)?;
        let overlay = self.overlay.get(table);
        let mut merged: BTreeMap<Vec<u8>, (Key, Value)> = BTreeMap::new();

        if !overlay.is_some_and(|o| o.cleared) {
            for entry in self.snap.iterator_cf(cf, IteratorMode::Start) {
                let (k, v) = entry?;
                if overlay.is_some_and(|o| o.rows.contains_key(k.as_ref())) {
                    continue;
                }
                merged.insert(k.to_vec(), (Key::decode(&k)?, decode_row(&v)?));
            }
        }
        if let Some(overlay) = overlay {
            for (kb, row) in &overlay.rows {
                if let Some(row) = row {
                    merged.insert(kb.clone(), (Key::decode(kb)?, row.clone()));
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Matching primary keys for one index key, in primary-key order,
    /// skipping rows deleted earlier in this transaction.
    fn index_matches(&self, table: &str, index: &str, key: &Key) -> Result<Vec<Key>, EngineError> {
        self.engine.schema().table(table)?.index(index)?;
        let overlay = self.overlay.get(table);
        if overlay.is_some_and(|o| o.cleared) {
            return Ok(Vec::new());
        }
        let prefix = key.encode();
        let icf = self.engine.cf(&index_cf_name(table, index))?;
        let mut out = Vec::new();
        for entry in self
            .snap
            .iterator_cf(icf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (k, _) = entry?;
            if !k.starts_with(&prefix) {
                break;
            }
            let pk_bytes = &k[prefix.len()..];
            if overlay.is_some_and(|o| matches!(o.rows.get(pk_bytes), Some(None))) {
                continue;
            }
            out.push(Key::decode(pk_bytes)?);
        }
        Ok(out)
    }

    /// Rows whose index value equals `key`, in primary-key order.
    pub fn scan_index(
        &self,
        table: &str,
        index: &str,
        key: &Key,
    ) -> Result<Vec<(Key, Value)>, EngineError> {
        let mut out = Vec::new();
        for pk in self.index_matches(table, index, key)? {
            let row = self.get(table, &pk)?.ok_or_else(|| {
                EngineError::Corrupt(format!("index {table}:{index} references a missing row"))
            })?;
            out.push((pk, row));
        }
        Ok(out)
    }

    /// Number of index entries for `key`, minus this transaction's deletes.
    pub fn count_index(&self, table: &str, index: &str, key: &Key) -> Result<u64, EngineError> {
        Ok(self.index_matches(table, index, key)?.len() as u64)
    }

    /// Cursor-scan one index key and delete every matching row.
    ///
    /// Correct for non-unique and multi-entry indexes: a row referenced by
    /// several entries is deleted once, and each deletion also removes the
    /// row's other index entries.
    pub fn delete_index_matches(
        &mut self,
        table: &str,
        index: &str,
        key: &Key,
    ) -> Result<u64, EngineError> {
        let matches = self.index_matches(table, index, key)?;
        let mut removed = 0;
        for pk in matches {
            if self.get(table, &pk)?.is_some() {
                self.delete(table, &pk)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn assert_unique(
        &self,
        table: &str,
        index: &IndexDef,
        entry_prefix: &[u8],
        pk_bytes: &[u8],
    ) -> Result<(), EngineError> {
        let overlay = self.overlay.get(table);
        if overlay.is_some_and(|o| o.cleared) {
            return Ok(());
        }
        let icf = self.engine.cf(&index_cf_name(table, &index.name))?;
        for entry in self
            .snap
            .iterator_cf(icf, IteratorMode::From(entry_prefix, Direction::Forward))
        {
            let (k, _) = entry?;
            if !k.starts_with(entry_prefix) {
                break;
            }
            let other_pk = &k[entry_prefix.len()..];
            if other_pk == pk_bytes
                || overlay.is_some_and(|o| matches!(o.rows.get(other_pk), Some(None)))
            {
                continue;
            }
            return Err(EngineError::DuplicateKey {
                table: table.to_string(),
                key: format!("unique index {}", index.name),
            });
        }
        Ok(())
    }

    /// Apply every write atomically.
    pub fn commit(mut self) -> Result<(), EngineError> {
        let engine = self.engine;
        for table in &self.sequences_touched {
            if let Some((key, bytes)) = engine.meta_sequence_entry(table) {
                self.batch.put_cf(engine.meta_cf()?, key, bytes);
            }
        }
        let mut opts = WriteOptions::default();
        opts.set_sync(engine.sync_writes());
        engine.db().write_opt(self.batch, &opts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, MigrationFn, SchemaBuilder, TableDef};
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn empty_step(_: &mut SchemaBuilder) {}

    fn step_v1(schema: &mut SchemaBuilder) {
        schema.create_table(TableDef::new("items", "id"));
        schema.create_table(
            TableDef::new("log", "seq")
                .with_auto_increment()
                .with_index(IndexDef::new("owner", "owner").with_multi_entry()),
        );
        schema.create_table(
            TableDef::new("labels", "id")
                .with_index(IndexDef::new("slug", "slug").with_unique()),
        );
    }

    const MIGRATIONS: &[MigrationFn] = &[empty_step, step_v1];

    fn engine() -> (StorageEngine, TempDir) {
        let dir = tempdir().unwrap();
        let engine =
            StorageEngine::open(EngineConfig::for_testing(dir.path()), MIGRATIONS, 1).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.put("items", json!({"id": "a", "n": 1})).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(
            tx.get("items", &Key::text("a")).unwrap(),
            Some(json!({"id": "a", "n": 1}))
        );
        assert_eq!(tx.get("items", &Key::text("b")).unwrap(), None);
    }

    #[test]
    fn test_uncommitted_writes_are_dropped() {
        let (engine, _dir) = engine();
        {
            let mut tx = engine.write_txn();
            tx.put("items", json!({"id": "a"})).unwrap();
            // dropped without commit
        }
        let tx = engine.read_txn();
        assert_eq!(tx.get("items", &Key::text("a")).unwrap(), None);
    }

    #[test]
    fn test_snapshot_isolation() {
        let (engine, _dir) = engine();
        let reader = engine.read_txn();

        let mut tx = engine.write_txn();
        tx.put("items", json!({"id": "a"})).unwrap();
        tx.commit().unwrap();

        // The snapshot predates the commit.
        assert_eq!(reader.get("items", &Key::text("a")).unwrap(), None);
        assert!(engine
            .read_txn()
            .get("items", &Key::text("a"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("items", json!({"id": "a"})).unwrap();
        let err = tx.add("items", json!({"id": "a"})).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));
        // put is an upsert and does not object
        tx.put("items", json!({"id": "a", "n": 2})).unwrap();
    }

    #[test]
    fn test_auto_increment_assigns_and_injects() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        let k1 = tx.add("log", json!({"owner": "a"})).unwrap();
        let k2 = tx.add("log", json!({"owner": "a"})).unwrap();
        tx.commit().unwrap();
        assert_eq!(k1, Key::Int(1));
        assert_eq!(k2, Key::Int(2));

        let tx = engine.read_txn();
        let row = tx.get("log", &Key::Int(1)).unwrap().unwrap();
        assert_eq!(row["seq"], json!(1));
    }

    #[test]
    fn test_explicit_key_advances_sequence() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("log", json!({"seq": 10, "owner": "a"})).unwrap();
        let next = tx.add("log", json!({"owner": "a"})).unwrap();
        tx.commit().unwrap();
        assert_eq!(next, Key::Int(11));
    }

    #[test]
    fn test_missing_key_rejected() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        let err = tx.put("items", json!({"n": 1})).unwrap_err();
        assert!(matches!(err, EngineError::MissingKey { .. }));
    }

    #[test]
    fn test_unknown_table_and_index() {
        let (engine, _dir) = engine();
        let tx = engine.read_txn();
        assert!(matches!(
            tx.get("nope", &Key::Int(1)),
            Err(EngineError::NoSuchTable(_))
        ));
        assert!(matches!(
            tx.scan_index("log", "nope", &Key::text("a")),
            Err(EngineError::NoSuchIndex { .. })
        ));
    }

    #[test]
    fn test_index_scan_in_insertion_order() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        for n in 0..5 {
            tx.add("log", json!({"owner": "a", "n": n})).unwrap();
        }
        tx.commit().unwrap();

        let tx = engine.read_txn();
        let rows = tx.scan_index("log", "owner", &Key::text("a")).unwrap();
        let ns: Vec<u64> = rows.iter().map(|(_, r)| r["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_index_scan_isolates_keys() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        // "doc1" and "doc10" must not shadow each other
        tx.add("log", json!({"owner": "doc1"})).unwrap();
        tx.add("log", json!({"owner": "doc10"})).unwrap();
        tx.add("log", json!({"owner": "doc1"})).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(tx.count_index("log", "owner", &Key::text("doc1")).unwrap(), 2);
        assert_eq!(tx.count_index("log", "owner", &Key::text("doc10")).unwrap(), 1);
    }

    #[test]
    fn test_multi_entry_index() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("log", json!({"owner": ["a", "b"]})).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(tx.count_index("log", "owner", &Key::text("a")).unwrap(), 1);
        assert_eq!(tx.count_index("log", "owner", &Key::text("b")).unwrap(), 1);
        // Deleting by either entry removes the row everywhere.
        let mut tx = engine.write_txn();
        let removed = tx
            .delete_index_matches("log", "owner", &Key::text("a"))
            .unwrap();
        assert_eq!(removed, 1);
        tx.commit().unwrap();
        let tx = engine.read_txn();
        assert_eq!(tx.count_index("log", "owner", &Key::text("b")).unwrap(), 0);
    }

    #[test]
    fn test_delete_cleans_index_entries() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        let key = tx.add("log", json!({"owner": "a"})).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        tx.delete("log", &key).unwrap();
        // Deleting an absent row is fine.
        tx.delete("log", &Key::Int(999)).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(tx.count_index("log", "owner", &Key::text("a")).unwrap(), 0);
        assert!(tx.scan("log").unwrap().is_empty());
    }

    #[test]
    fn test_put_moves_index_entries() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.put("log", json!({"seq": 1, "owner": "a"})).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        tx.put("log", json!({"seq": 1, "owner": "b"})).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(tx.count_index("log", "owner", &Key::text("a")).unwrap(), 0);
        assert_eq!(tx.count_index("log", "owner", &Key::text("b")).unwrap(), 1);
    }

    #[test]
    fn test_clear_wipes_rows_and_indexes() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        for _ in 0..3 {
            tx.add("log", json!({"owner": "a"})).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        // Also cover rows added inside the clearing transaction.
        tx.add("log", json!({"owner": "b"})).unwrap();
        tx.clear("log").unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert!(tx.scan("log").unwrap().is_empty());
        assert_eq!(tx.count_index("log", "owner", &Key::text("a")).unwrap(), 0);
        assert_eq!(tx.count_index("log", "owner", &Key::text("b")).unwrap(), 0);
    }

    #[test]
    fn test_overlay_remove_then_insert() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("items", json!({"id": "a", "n": 1})).unwrap();
        tx.commit().unwrap();

        // The bulk-import pattern: clear, then re-add the same key in one txn.
        let mut tx = engine.write_txn();
        tx.clear("items").unwrap();
        tx.add("items", json!({"id": "a", "n": 2})).unwrap();
        tx.commit().unwrap();

        let tx = engine.read_txn();
        assert_eq!(
            tx.get("items", &Key::text("a")).unwrap(),
            Some(json!({"id": "a", "n": 2}))
        );
    }

    #[test]
    fn test_in_txn_delete_hides_from_index_reads() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        let key = tx.add("log", json!({"owner": "a"})).unwrap();
        tx.add("log", json!({"owner": "a"})).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        tx.delete("log", &key).unwrap();
        assert_eq!(tx.count_index("log", "owner", &Key::text("a")).unwrap(), 1);
        assert_eq!(tx.scan_index("log", "owner", &Key::text("a")).unwrap().len(), 1);
    }

    #[test]
    fn test_write_scan_merges_overlay() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("items", json!({"id": "a"})).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        tx.add("items", json!({"id": "b"})).unwrap();
        tx.delete("items", &Key::text("a")).unwrap();
        let rows = tx.scan("items").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, Key::text("b"));
    }

    #[test]
    fn test_unique_index_enforced() {
        let (engine, _dir) = engine();
        let mut tx = engine.write_txn();
        tx.add("labels", json!({"id": "a", "slug": "intro"})).unwrap();
        tx.commit().unwrap();

        let mut tx = engine.write_txn();
        let err = tx
            .add("labels", json!({"id": "b", "slug": "intro"}))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));

        // Deleting the holder first makes the slug available again.
        let mut tx = engine.write_txn();
        tx.delete("labels", &Key::text("a")).unwrap();
        tx.add("labels", json!({"id": "b", "slug": "intro"})).unwrap();
        tx.commit().unwrap();
    }
}
