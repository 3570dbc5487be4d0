//! Collaboration session: one replica, one provider connection, presence.
//!
//! ```text
//!            observers (any thread)              drain_events (owner)
//! Replica ───────────────────────► mpsc ──────────────────────► controller
//!    ▲                                                            │
//!    └─────────────rebase_markdown / set_shared_config─────────────┘
//! ```
//!
//! Observers never call back into the owner; they only enqueue
//! [`SessionEvent`]s. Dropping the session (or calling [`stop`]) drops the
//! subscriptions first, so a stopped session delivers nothing.
//!
//! [`stop`]: CollabSession::stop

use serde_json::Value;
use tokio::sync::mpsc;
use yrs::Subscription;

use scribe_core::ConfigPatch;

use crate::error::CollabError;
use crate::presence::{random_identity, PresenceIdentity};
use crate::provider::{ConnectionState, ProviderHandle, SyncProvider};
use crate::replica::Replica;

/// Awareness field carrying the display identity.
pub const USER_FIELD: &str = "user";

/// Something the owner of a session has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A peer changed the shared font / fontSize / contentWidth.
    ConfigChanged(ConfigPatch),
    /// A peer changed the shared document text.
    DocumentChanged,
    /// The provider connection changed state.
    Status(ConnectionState),
}

pub struct CollabSession {
    room: String,
    replica: Replica,
    identity: PresenceIdentity,
    handle: Option<Box<dyn ProviderHandle>>,
    subscriptions: Vec<Subscription>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    last_status: ConnectionState,
}

impl CollabSession {
    /// Join `room` with `replica` through `provider`.
    ///
    /// Observers are attached before connecting so the initial sync with
    /// the room already produces events.
    pub fn start(
        room: &str,
        replica: Replica,
        provider: &dyn SyncProvider,
    ) -> Result<Self, CollabError> {
        let (tx, events) = mpsc::unbounded_channel();

        let config_tx = tx.clone();
        let config_sub = replica.observe_remote_config(move |patch| {
            let _ = config_tx.send(SessionEvent::ConfigChanged(patch));
        });
        let document_sub = replica.observe_remote_document(move || {
            let _ = tx.send(SessionEvent::DocumentChanged);
        });

        let mut handle = provider.connect(room, &replica)?;
        let identity = random_identity();
        handle.set_local_state_field(USER_FIELD, identity.to_value());
        let last_status = handle.status();

        log::info!("Collaboration started in room {room} as {}", identity.name);
        Ok(Self {
            room: room.to_string(),
            replica,
            identity,
            handle: Some(handle),
            subscriptions: vec![config_sub, document_sub],
            events,
            last_status,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn identity(&self) -> &PresenceIdentity {
        &self.identity
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    /// Current provider status; `Disconnected` once stopped.
    pub fn status(&self) -> ConnectionState {
        self.handle
            .as_ref()
            .map_or(ConnectionState::Disconnected, |h| h.status())
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Presence states of the other peers.
    pub fn remote_states(&self) -> Vec<Value> {
        self.handle
            .as_ref()
            .map(|h| h.remote_states())
            .unwrap_or_default()
    }

    /// Everything that happened since the last call, in arrival order,
    /// followed by a status event if the connection state changed.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        if self.handle.is_none() {
            return drained;
        }
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        let status = self.status();
        if status != self.last_status {
            self.last_status = status;
            drained.push(SessionEvent::Status(status));
        }
        drained
    }

    /// Detach observers and leave the room. Idempotent.
    pub fn stop(&mut self) {
        self.subscriptions.clear();
        if let Some(mut handle) = self.handle.take() {
            handle.destroy();
            log::info!("Collaboration stopped in room {}", self.room);
        }
        while self.events.try_recv().is_ok() {}
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("room", &self.room)
            .field("identity", &self.identity.name)
            .field("live", &self.is_live())
            .finish()
    }
}
