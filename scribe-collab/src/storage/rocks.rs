//! RocksDB-backed durable store.
//!
//! Column families:
//! - `state` - editor key-value records (the persisted controller state)
//! - `rooms` - relay room snapshots (full Yrs state, LZ4-framed, keyed by room name)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::DurableStore;

/// Column family names.
const CF_STATE: &str = "state";
const CF_ROOMS: &str = "rooms";

const COLUMN_FAMILIES: &[&str] = &[CF_STATE, CF_ROOMS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Enable fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scribe_data"),
            block_cache_size: 32 * 1024 * 1024,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    Database(String),
    /// In-memory store lock poisoned
    #[error("Store lock poisoned")]
    Poisoned,
    /// Stored room snapshot failed to decompress
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// RocksDB-backed store.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode - concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened durable store at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_STATE => {
                // A handful of small records, rewritten often.
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_ROOMS => {
                // Snapshots arrive LZ4-framed already.
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    // ─── Room snapshots ──────────────────────────────────────────────

    /// Save the full CRDT state of a relay room.
    pub fn save_room(&self, room: &str, snapshot: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let compressed = lz4_flex::compress_prepend_size(snapshot);
        self.db
            .put_cf_opt(&cf, room.as_bytes(), &compressed, &self.write_options())?;
        Ok(())
    }

    /// Load a room snapshot (LZ4 decompressed).
    pub fn load_room(&self, room: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(&cf, room.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    /// Names of every persisted room.
    pub fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut rooms = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            rooms.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(rooms)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl DurableStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_STATE)?;
        Ok(self.db.get_cf(&cf, key.as_bytes())?)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_STATE)?;
        self.db
            .put_cf_opt(&cf, key.as_bytes(), value, &self.write_options())?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_STATE)?;
        self.db
            .delete_cf_opt(&cf, key.as_bytes(), &self.write_options())?;
        Ok(())
    }
}
