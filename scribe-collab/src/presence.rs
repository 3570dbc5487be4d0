//! Presence: who else is in the room, and how they are shown.
//!
//! Every session picks a display identity (two capitalized words plus a
//! palette color) and publishes it as the `user` field of its awareness
//! state. Remote awareness states are tracked per peer in a
//! [`PresenceRoom`].
//!
//! ```text
//! identity(seed) ──► {"user": {name, background, foreground}}
//!                              │  Awareness message
//!                              ▼
//!                     PresenceRoom (remote peers)
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use scribe_core::THEMES;

use crate::protocol::{MessageType, SyncMessage};

const ADJECTIVES: &[&str] = &[
    "able", "amber", "brave", "bright", "calm", "clever", "curious", "daring", "eager", "gentle",
    "golden", "happy", "honest", "jolly", "kind", "lively", "lucky", "mellow", "merry", "nimble",
    "proud", "quiet", "rapid", "silent", "swift", "tidy", "vivid", "witty", "young", "zealous",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "crane", "dolphin", "eagle", "falcon", "ferret", "gecko",
    "heron", "ibis", "jackal", "koala", "lemur", "lynx", "marmot", "newt", "ocelot", "otter",
    "panda", "puffin", "quail", "raven", "salmon", "tapir", "toucan", "viper", "walrus", "yak",
    "zebra",
];

/// How a peer is shown to the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceIdentity {
    pub name: String,
    pub background: String,
    pub foreground: String,
}

impl PresenceIdentity {
    /// Awareness `user` field value.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "background": self.background,
            "foreground": self.foreground,
        })
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Derive a display identity from `seed`. Pure: the same seed always
/// yields the same name and color.
pub fn identity(seed: u128) -> PresenceIdentity {
    let adjective = ADJECTIVES[(seed % ADJECTIVES.len() as u128) as usize];
    let animal = ANIMALS[((seed >> 32) % ANIMALS.len() as u128) as usize];
    let theme = &THEMES[((seed >> 64) % THEMES.len() as u128) as usize];
    PresenceIdentity {
        name: format!("{} {}", capitalize(adjective), capitalize(animal)),
        background: theme.primary_background.to_string(),
        foreground: theme.primary_foreground.to_string(),
    }
}

/// A fresh random identity for a new session.
pub fn random_identity() -> PresenceIdentity {
    identity(Uuid::new_v4().as_u128())
}

// ─── Room state ─────────────────────────────────────────────────────

/// Awareness states of one room: ours plus every remote peer's.
#[derive(Debug, Clone)]
pub struct PresenceRoom {
    local_peer: Uuid,
    local_state: Map<String, Value>,
    peers: HashMap<Uuid, Value>,
}

impl PresenceRoom {
    pub fn new(local_peer: Uuid) -> Self {
        Self {
            local_peer,
            local_state: Map::new(),
            peers: HashMap::new(),
        }
    }

    /// Set one field of the local awareness state; returns the full state.
    pub fn set_local_field(&mut self, field: &str, value: Value) -> Value {
        self.local_state.insert(field.to_string(), value);
        Value::Object(self.local_state.clone())
    }

    pub fn local_state(&self) -> Value {
        Value::Object(self.local_state.clone())
    }

    /// Track a remote peer's state from an incoming message.
    pub fn handle_message(&mut self, msg: &SyncMessage) {
        if msg.peer_id == self.local_peer {
            return;
        }
        match msg.msg_type {
            MessageType::Awareness => match msg.awareness_state() {
                Ok(state) => {
                    self.peers.insert(msg.peer_id, state);
                }
                Err(e) => log::warn!("Dropping malformed awareness from {}: {e}", msg.peer_id),
            },
            MessageType::PeerLeft => {
                self.peers.remove(&msg.peer_id);
            }
            _ => {}
        }
    }

    pub fn set_remote(&mut self, peer: Uuid, state: Value) {
        if peer != self.local_peer {
            self.peers.insert(peer, state);
        }
    }

    pub fn remove_remote(&mut self, peer: &Uuid) {
        self.peers.remove(peer);
    }

    /// Forget every remote peer, e.g. after the connection dropped.
    pub fn clear_remote(&mut self) {
        self.peers.clear();
    }

    pub fn remote_states(&self) -> Vec<Value> {
        self.peers.values().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
