//! # scribe-collab - Real-time collaboration layer for Scribe
//!
//! Keeps a document's CRDT replica in sync with every other editor in the
//! same room, over an in-process hub or a WebSocket relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐                      ┌────────────────┐
//! │ CollabSession  │      WebSocket       │ RelayServer    │
//! │ (per editor)   │ ◄──────────────────► │ (central)      │
//! └───────┬────────┘    Binary Proto      └───────┬────────┘
//!         │                                       │
//!         ▼                                       ▼
//! ┌────────────────┐                      ┌────────────────┐
//! │ Replica        │                      │ Replica        │
//! │ Y.Text + Y.Map │                      │ (authority)    │
//! └────────────────┘                      └───────┬────────┘
//!                                                 │
//!                                  ┌──────────────┴─────────────┐
//!                                  │ BroadcastGroup │ RocksStore │
//!                                  └────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`replica`] - Yrs document wrapper (markdown text + shared config)
//! - [`provider`] - provider traits and connection state
//! - [`hub`] - in-process provider
//! - [`websocket`] - WebSocket provider with offline queue
//! - [`relay`] - WebSocket relay server
//! - [`broadcast`] - room fan-out with backpressure
//! - [`protocol`] - binary wire protocol (bincode-encoded SyncMessage)
//! - [`presence`] - display identities and awareness tracking
//! - [`session`] - a live collaboration: replica + provider + observers
//! - [`storage`] - durable key-value stores (RocksDB, memory)

pub mod broadcast;
pub mod error;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod replica;
pub mod session;
pub mod storage;
pub mod websocket;

pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use error::CollabError;
pub use hub::LocalHub;
pub use presence::{identity, random_identity, PresenceIdentity, PresenceRoom};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use provider::{ConnectionState, ProviderHandle, SyncProvider};
pub use relay::{RelayConfig, RelayServer, RelayStats};
pub use replica::Replica;
pub use session::{CollabSession, SessionEvent};
pub use storage::{DurableStore, MemoryStore, RocksStore, StoreConfig, StoreError};
pub use websocket::{OfflineQueue, WebsocketProvider};
