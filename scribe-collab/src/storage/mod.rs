//! Durable key-value storage.
//!
//! ```text
//! ┌──────────────────┐   "state" → JSON    ┌────────────────────────────┐
//! │ PersistenceGateway│ ─────────────────► │ RocksStore (RocksDB)       │
//! │ (editor)          │                    │  CF "state" - editor state │
//! └──────────────────┘                     │  CF "rooms" - relay CRDTs  │
//! ┌──────────────────┐  room → CRDT bytes  │                            │
//! │ RelayServer      │ ─────────────────►  └────────────────────────────┘
//! └──────────────────┘
//! ```
//!
//! The editor talks to the [`DurableStore`] trait so tests and ephemeral
//! sessions can run on [`MemoryStore`] instead.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig, StoreError};

/// Byte-valued key-value store that survives restarts.
pub trait DurableStore: Send + Sync {
    /// `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
