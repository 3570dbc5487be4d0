//! Fan-out broadcast to N-1 peers with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each peer gets an independent receiver that buffers up to `capacity`
//! messages; a peer that falls further behind observes `Lagged` and
//! recovers through the next handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, SyncMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single room.
///
/// All peers in the same room share one channel. Every message is sent to
/// every receiver; filtering out the sender's own messages is the
/// receiving side's job.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connected peers, each with its last encoded awareness message so a
    /// late joiner can be told who is already present.
    peers: RwLock<HashMap<Uuid, Option<Arc<Vec<u8>>>>>,

    capacity: usize,

    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a peer; returns the receiver it consumes messages from.
    pub async fn add_peer(&self, peer_id: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.entry(peer_id).or_insert(None);
        self.sender.subscribe()
    }

    /// Remove a peer. Returns `false` if it was not present.
    pub async fn remove_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id).is_some()
    }

    /// Encode and broadcast a message. Returns the number of receivers.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        // No receivers is not an error.
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Remember the latest awareness message of `peer_id`.
    pub async fn record_awareness(&self, peer_id: Uuid, encoded: Arc<Vec<u8>>) {
        if let Some(slot) = self.peers.write().await.get_mut(&peer_id) {
            *slot = Some(encoded);
        }
    }

    /// Latest awareness messages of every peer except `exclude`.
    pub async fn awareness_except(&self, exclude: &Uuid) -> Vec<Arc<Vec<u8>>> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id != exclude)
            .filter_map(|(_, state)| state.clone())
            .collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
