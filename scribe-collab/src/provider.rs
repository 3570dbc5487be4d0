//! Network synchronization providers.
//!
//! A provider connects a [`Replica`] to a room and keeps it in sync with
//! every other replica in that room. Two implementations ship with the
//! crate: [`LocalHub`](crate::hub::LocalHub) relays between replicas of the
//! same process, [`WebsocketProvider`](crate::websocket::WebsocketProvider)
//! talks to a [`RelayServer`](crate::relay::RelayServer).

use serde_json::Value;

use crate::error::CollabError;
use crate::replica::Replica;

/// Connection state of a provider handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Factory for room connections.
pub trait SyncProvider: Send + Sync {
    /// Join `room` with `replica`. The provider applies incoming updates to
    /// the replica and ships the replica's local updates until the returned
    /// handle is destroyed.
    fn connect(&self, room: &str, replica: &Replica) -> Result<Box<dyn ProviderHandle>, CollabError>;
}

/// A live room connection.
pub trait ProviderHandle: Send {
    /// Set one field of the local presence state and publish it.
    fn set_local_state_field(&mut self, field: &str, value: Value);

    fn status(&self) -> ConnectionState;

    /// Presence states of the other peers in the room.
    fn remote_states(&self) -> Vec<Value>;

    /// Leave the room. Idempotent; no updates flow afterwards.
    fn destroy(&mut self);
}
