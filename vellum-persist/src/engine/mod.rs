//! RocksDB-backed table engine.
//!
//! Provides the storage capability the document store is written against:
//! named tables with primary keys, secondary indexes, atomic multi-table
//! write transactions, snapshot reads, and schema versioning.
//!
//! Layout:
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    StorageEngine                       │
//! │                                                        │
//! │  CF "<table>"          encoded(key) → lz4(json(row))   │
//! │  CF "<table>:<index>"  encoded(index key) ++           │
//! │                        encoded(primary key) → ()       │
//! │  CF "meta"             schema version, sequences       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Index entries sort by index key first and primary key second, so a prefix
//! scan over one index key yields matching rows in primary-key order.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (Log-Structured Storage)

pub mod key;
pub mod txn;

pub use key::{Key, KeyPath};
pub use txn::{ReadTxn, WriteTxn};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type Db = DBWithThreadMode<SingleThreaded>;

/// Bookkeeping column family: schema version and auto-increment sequences.
const CF_META: &str = "meta";
const META_VERSION: &[u8] = b"schema-version";

fn meta_sequence_key(table: &str) -> Vec<u8> {
    format!("sequence:{table}").into_bytes()
}

pub(crate) fn index_cf_name(table: &str, index: &str) -> String {
    format!("{table}:{index}")
}

/// Engine errors.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// RocksDB internal error
    Database(String),
    /// Row serialization failed
    Serialize(String),
    /// Row deserialization failed
    Deserialize(String),
    /// Stored bytes are not in the expected shape
    Corrupt(String),
    /// Unknown table name
    NoSuchTable(String),
    /// Unknown index name
    NoSuchIndex { table: String, index: String },
    /// Row has no value at the table's key path
    MissingKey { table: String },
    /// Add-only insert collided with an existing row
    DuplicateKey { table: String, key: String },
    /// Store was created at a newer schema version than requested
    VersionMismatch { stored: u32, requested: u32 },
    /// Migration list does not cover the requested version
    Migration(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Database(e) => write!(f, "database error: {e}"),
            EngineError::Serialize(e) => write!(f, "serialization error: {e}"),
            EngineError::Deserialize(e) => write!(f, "deserialization error: {e}"),
            EngineError::Corrupt(e) => write!(f, "corrupt data: {e}"),
            EngineError::NoSuchTable(name) => write!(f, "no such table: {name}"),
            EngineError::NoSuchIndex { table, index } => {
                write!(f, "no such index: {table}:{index}")
            }
            EngineError::MissingKey { table } => {
                write!(f, "row for table {table} has no key and the table is not auto-increment")
            }
            EngineError::DuplicateKey { table, key } => {
                write!(f, "duplicate key {key} in table {table}")
            }
            EngineError::VersionMismatch { stored, requested } => write!(
                f,
                "store is at schema version {stored}, newer than requested version {requested}"
            ),
            EngineError::Migration(e) => write!(f, "migration error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

/// Secondary index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub key_path: KeyPath,
    /// Array-valued fields produce one entry per element.
    pub multi_entry: bool,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            multi_entry: false,
            unique: false,
        }
    }

    pub fn with_multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub key_path: KeyPath,
    /// Engine-assigned integer keys, starting at 1, never reused.
    pub auto_increment: bool,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn with_auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Result<&IndexDef, EngineError> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| EngineError::NoSuchIndex {
                table: self.name.clone(),
                index: name.to_string(),
            })
    }
}

/// The full table layout at one schema version.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub version: u32,
    pub tables: Vec<TableDef>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Result<&TableDef, EngineError> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::NoSuchTable(name.to_string()))
    }

    /// Every column family this schema needs, bookkeeping included.
    fn cf_names(&self) -> Vec<String> {
        let mut names = vec![CF_META.to_string()];
        for table in &self.tables {
            names.push(table.name.clone());
            for index in &table.indexes {
                names.push(index_cf_name(&table.name, &index.name));
            }
        }
        names
    }
}

/// Accumulates table definitions across migration steps.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
}

impl SchemaBuilder {
    pub fn create_table(&mut self, def: TableDef) {
        self.tables.push(def);
    }

    fn finish(self, version: u32) -> Schema {
        Schema {
            version,
            tables: self.tables,
        }
    }
}

/// One forward-only upgrade step. Index in the migration list is the schema
/// version the step produces; steps run (logically) at most once per store.
pub type MigrationFn = fn(&mut SchemaBuilder);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes
    pub block_cache_size: usize,
    /// Bloom filter bits per key
    pub bloom_filter_bits: i32,
    /// fsync on every commit (default: off, RocksDB WAL provides atomicity)
    pub sync_writes: bool,
    /// Max open files for RocksDB
    pub max_open_files: i32,
    /// Write buffer size per column family
    pub write_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vellum_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Config for testing (small caches, caller-provided temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed table engine.
pub struct StorageEngine {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: Db,
    config: EngineConfig,
    schema: Schema,
    /// Next auto-increment key per table, persisted through `meta`
    sequences: HashMap<String, AtomicU64>,
}

impl StorageEngine {
    /// Open (or create) the engine at the configured path and migrate it to
    /// `version`.
    ///
    /// The migration list is indexed by the version each step produces; steps
    /// for versions above the store's current one are applied, in order.
    /// Opening a store whose persisted version exceeds `version` fails.
    pub fn open(
        config: EngineConfig,
        migrations: &[MigrationFn],
        version: u32,
    ) -> Result<Self, EngineError> {
        if (version as usize) >= migrations.len() {
            return Err(EngineError::Migration(format!(
                "no migration step defined for version {version}"
            )));
        }

        let mut builder = SchemaBuilder::default();
        if version > 0 {
            for step in &migrations[1..=version as usize] {
                step(&mut builder);
            }
        }
        let schema = builder.finish(version);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        // RocksDB refuses to open unless every existing column family is
        // listed, so union the schema's families with whatever is on disk.
        let mut cf_names = schema.cf_names();
        for existing in Db::list_cf(&Options::default(), &config.path).unwrap_or_default() {
            if !cf_names.contains(&existing) {
                cf_names.push(existing);
            }
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(&config)))
            .collect();

        let db = Db::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)?;

        let meta = db
            .cf_handle(CF_META)
            .ok_or_else(|| EngineError::Database("meta column family missing".into()))?;

        let stored = match db.get_cf(&meta, META_VERSION)? {
            Some(bytes) => decode_u32(&bytes)?,
            None => 0,
        };
        if stored > version {
            return Err(EngineError::VersionMismatch {
                stored,
                requested: version,
            });
        }
        if stored < version {
            db.put_cf(&meta, META_VERSION, version.to_be_bytes())?;
            log::info!("storage schema upgraded from v{stored} to v{version}");
        }

        let mut sequences = HashMap::new();
        for table in &schema.tables {
            if !table.auto_increment {
                continue;
            }
            let persisted = match db.get_cf(&meta, meta_sequence_key(&table.name))? {
                Some(bytes) => decode_u64(&bytes)?,
                None => 1,
            };
            let from_rows = Self::recover_sequence(&db, &table.name)?;
            // Never reuse a value: the persisted counter survives deletion of
            // every row, the row scan covers stores written before a crash
            // could persist the counter.
            sequences.insert(table.name.clone(), AtomicU64::new(persisted.max(from_rows)));
        }

        Ok(Self {
            db,
            config,
            schema,
            sequences,
        })
    }

    /// Delete the physical store. No migration steps run.
    pub fn destroy(path: impl AsRef<Path>) -> Result<(), EngineError> {
        Db::destroy(&Options::default(), path.as_ref())?;
        Ok(())
    }

    fn cf_options(config: &EngineConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        opts
    }

    /// Largest key currently in an auto-increment table, plus one.
    fn recover_sequence(db: &Db, table: &str) -> Result<u64, EngineError> {
        let cf = db
            .cf_handle(table)
            .ok_or_else(|| EngineError::NoSuchTable(table.to_string()))?;
        let mut iter = db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(entry) => {
                let (key_bytes, _) = entry?;
                match Key::decode(&key_bytes)? {
                    Key::Int(n) => Ok(n + 1),
                    other => Err(EngineError::Corrupt(format!(
                        "auto-increment table {table} holds non-integer key {other:?}"
                    ))),
                }
            }
            None => Ok(1),
        }
    }

    /// Begin a read-only transaction (consistent snapshot across all tables).
    pub fn read_txn(&self) -> ReadTxn<'_> {
        ReadTxn::new(self)
    }

    /// Begin a read-write transaction. Nothing is visible to other readers
    /// until `commit`, which applies every write atomically.
    pub fn write_txn(&self) -> WriteTxn<'_> {
        WriteTxn::new(self)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn sync_writes(&self) -> bool {
        self.config.sync_writes
    }

    /// Get a column family handle.
    pub(crate) fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, EngineError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Database(format!("column family '{name}' not found")))
    }

    pub(crate) fn meta_cf(&self) -> Result<&rocksdb::ColumnFamily, EngineError> {
        self.cf(CF_META)
    }

    pub(crate) fn meta_sequence_entry(&self, table: &str) -> Option<(Vec<u8>, [u8; 8])> {
        self.sequences
            .get(table)
            .map(|seq| (meta_sequence_key(table), seq.load(Ordering::SeqCst).to_be_bytes()))
    }

    /// Allocate the next auto-increment key for `table`.
    pub(crate) fn next_key(&self, table: &str) -> Result<u64, EngineError> {
        self.sequences
            .get(table)
            .map(|seq| seq.fetch_add(1, Ordering::SeqCst))
            .ok_or_else(|| EngineError::MissingKey {
                table: table.to_string(),
            })
    }

    /// Advance the sequence past an explicitly supplied key.
    pub(crate) fn bump_past(&self, table: &str, key: u64) {
        if let Some(seq) = self.sequences.get(table) {
            seq.fetch_max(key + 1, Ordering::SeqCst);
        }
    }
}

/// Serialize a row for storage: JSON bytes, LZ4-compressed.
pub(crate) fn encode_row(row: &Value) -> Result<Vec<u8>, EngineError> {
    let raw = serde_json::to_vec(row).map_err(|e| EngineError::Serialize(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

pub(crate) fn decode_row(bytes: &[u8]) -> Result<Value, EngineError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| EngineError::Corrupt(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| EngineError::Deserialize(e.to_string()))
}

/// Encoded index entries for one row under one index definition.
///
/// A missing or non-key value at the index's key path produces no entries
/// (the row simply does not appear in that index); a multi-entry index over
/// an array value produces one entry per element.
pub(crate) fn index_entries(index: &IndexDef, row: &Value) -> Vec<Vec<u8>> {
    let field = match &index.key_path {
        KeyPath::Single(field) => field,
        // Composite index paths extract a single array key.
        KeyPath::Composite(_) => {
            return index
                .key_path
                .extract(row)
                .map(|k| vec![k.encode()])
                .unwrap_or_default()
        }
    };
    match row.get(field) {
        Some(Value::Array(items)) if index.multi_entry => items
            .iter()
            .filter_map(Key::from_value)
            .map(|k| k.encode())
            .collect(),
        Some(value) => Key::from_value(value).map(|k| vec![k.encode()]).unwrap_or_default(),
        None => Vec::new(),
    }
}

fn decode_u32(bytes: &[u8]) -> Result<u32, EngineError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| EngineError::Corrupt("malformed u32 in meta".into()))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, EngineError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| EngineError::Corrupt("malformed u64 in meta".into()))?;
    Ok(u64::from_be_bytes(arr))
}
