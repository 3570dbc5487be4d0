//! In-process room hub.
//!
//! Replicas that join the same room of one [`LocalHub`] exchange their full
//! state on join and every local update afterwards. Each peer owns a
//! delivery task that applies its inbox to its replica and routes its
//! outbox to the other peers, so no replica transaction is ever open while
//! the hub lock is held.
//!
//! ```text
//!  replica A ── outbox ──► task A ──► inbox B ──► task B ──► replica B
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use yrs::Subscription;

use crate::error::CollabError;
use crate::provider::{ConnectionState, ProviderHandle, SyncProvider};
use crate::replica::Replica;

struct HubPeer {
    id: Uuid,
    replica: Replica,
    inbox: mpsc::UnboundedSender<Vec<u8>>,
    awareness: Option<Value>,
}

type Rooms = Arc<Mutex<HashMap<String, Vec<HubPeer>>>>;

/// Shared in-process hub. Clones refer to the same rooms.
#[derive(Clone, Default)]
pub struct LocalHub {
    rooms: Rooms,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers currently joined to `room`.
    pub fn peer_count(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .map(|rooms| rooms.get(room).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn route(rooms: &Rooms, room: &str, from: Uuid, update: Vec<u8>) {
        let Ok(rooms) = rooms.lock() else { return };
        for peer in rooms.get(room).into_iter().flatten() {
            if peer.id != from {
                // A closed inbox belongs to a peer that is leaving.
                let _ = peer.inbox.send(update.clone());
            }
        }
    }
}

impl SyncProvider for LocalHub {
    fn connect(&self, room: &str, replica: &Replica) -> Result<Box<dyn ProviderHandle>, CollabError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CollabError::Connection(e.to_string()))?;

        let id = Uuid::new_v4();
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let subscription = replica.observe_outgoing(move |update| {
            let _ = outbox_tx.send(update);
        })?;

        let others: Vec<(Replica, mpsc::UnboundedSender<Vec<u8>>)> = {
            let mut rooms = self
                .rooms
                .lock()
                .map_err(|_| CollabError::Connection("hub lock poisoned".into()))?;
            let peers = rooms.entry(room.to_string()).or_default();
            let others = peers
                .iter()
                .map(|p| (p.replica.clone(), p.inbox.clone()))
                .collect();
            peers.push(HubPeer {
                id,
                replica: replica.clone(),
                inbox: inbox_tx,
                awareness: None,
            });
            others
        };

        // Initial exchange, outside the hub lock.
        let own_state = replica.encode_state();
        for (other, inbox) in others {
            if let Err(e) = replica.apply_remote(&other.encode_state()) {
                log::warn!("Initial sync in local room {room} failed: {e}");
            }
            let _ = inbox.send(own_state.clone());
        }

        let task_replica = replica.clone();
        let rooms = self.rooms.clone();
        let task_room = room.to_string();
        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    Some(update) = inbox_rx.recv() => {
                        if let Err(e) = task_replica.apply_remote(&update) {
                            log::warn!("Dropping undecodable hub update in {task_room}: {e}");
                        }
                    }
                    Some(update) = outbox_rx.recv() => {
                        LocalHub::route(&rooms, &task_room, id, update);
                    }
                    else => break,
                }
            }
        });

        log::info!("Peer {id} joined local room {room}");
        Ok(Box::new(HubHandle {
            id,
            room: room.to_string(),
            rooms: self.rooms.clone(),
            local_state: Map::new(),
            subscription: Some(subscription),
            task: Some(task),
        }))
    }
}

struct HubHandle {
    id: Uuid,
    room: String,
    rooms: Rooms,
    local_state: Map<String, Value>,
    subscription: Option<Subscription>,
    task: Option<JoinHandle<()>>,
}

impl ProviderHandle for HubHandle {
    fn set_local_state_field(&mut self, field: &str, value: Value) {
        self.local_state.insert(field.to_string(), value);
        let Ok(mut rooms) = self.rooms.lock() else { return };
        if let Some(peer) = rooms
            .get_mut(&self.room)
            .and_then(|peers| peers.iter_mut().find(|p| p.id == self.id))
        {
            peer.awareness = Some(Value::Object(self.local_state.clone()));
        }
    }

    fn status(&self) -> ConnectionState {
        if self.task.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn remote_states(&self) -> Vec<Value> {
        let Ok(rooms) = self.rooms.lock() else {
            return Vec::new();
        };
        rooms
            .get(&self.room)
            .into_iter()
            .flatten()
            .filter(|p| p.id != self.id)
            .filter_map(|p| p.awareness.clone())
            .collect()
    }

    fn destroy(&mut self) {
        let Some(task) = self.task.take() else { return };
        self.subscription = None;
        task.abort();
        if let Ok(mut rooms) = self.rooms.lock() {
            if let Some(peers) = rooms.get_mut(&self.room) {
                peers.retain(|p| p.id != self.id);
                if peers.is_empty() {
                    rooms.remove(&self.room);
                }
            }
        }
        log::info!("Peer {} left local room {}", self.id, self.room);
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}
