//! WebSocket relay with room-based document routing.
//!
//! Architecture:
//! ```text
//! Editor A ──┐
//!             ├── Room ("3f2c…") ── Replica ── BroadcastGroup
//! Editor B ──┘                        │
//!                                     └── RocksStore (room snapshots)
//!                                            │
//!                          ┌─────────────────┼───────────┐
//!                          ▼                 ▼           ▼
//!                       Editor A          Editor B    Editor C
//! ```
//!
//! Each room keeps an authoritative [`Replica`] so late joiners can be
//! brought up to date even when nobody else is online, and a
//! [`BroadcastGroup`] for fan-out. When the last peer leaves, the room's
//! full state is written to the store and the room is dropped; it is
//! reloaded the next time someone joins.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::error::CollabError;
use crate::protocol::{MessageType, SyncMessage};
use crate::replica::Replica;
use crate::storage::{RocksStore, StoreConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Room snapshot storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

impl RelayConfig {
    /// Read overrides from `SCRIBE_RELAY_ADDR`, `SCRIBE_RELAY_CAPACITY`
    /// and `SCRIBE_RELAY_STORAGE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("SCRIBE_RELAY_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(capacity) = std::env::var("SCRIBE_RELAY_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.broadcast_capacity = capacity;
        }
        if let Ok(path) = std::env::var("SCRIBE_RELAY_STORAGE") {
            config.storage_path = Some(PathBuf::from(path));
        }
        config
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub persisted_snapshots: u64,
}

/// One room: authoritative replica + broadcast group.
struct RelayRoom {
    replica: Replica,
    broadcast: Arc<BroadcastGroup>,
}

impl RelayRoom {
    fn new(capacity: usize) -> Self {
        Self {
            replica: Replica::new(),
            broadcast: Arc::new(BroadcastGroup::new(capacity)),
        }
    }
}

type Rooms = Arc<RwLock<HashMap<String, RelayRoom>>>;

/// Shared state handed to every connection task.
#[derive(Clone)]
struct Shared {
    rooms: Rooms,
    stats: Arc<RwLock<RelayStats>>,
    store: Option<Arc<RocksStore>>,
    capacity: usize,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    shared: Shared,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Result<Self, CollabError> {
        let store = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Some(Arc::new(RocksStore::open(store_config)?))
            }
            None => None,
        };

        Ok(Self {
            shared: Shared {
                rooms: Arc::new(RwLock::new(HashMap::new())),
                stats: Arc::new(RwLock::new(RelayStats::default())),
                store,
                capacity: config.broadcast_capacity,
            },
            config,
        })
    }

    /// In-memory relay on the default address.
    pub fn with_defaults() -> Self {
        Self {
            shared: Shared {
                rooms: Arc::new(RwLock::new(HashMap::new())),
                stats: Arc::new(RwLock::new(RelayStats::default())),
                store: None,
                capacity: RelayConfig::default().broadcast_capacity,
            },
            config: RelayConfig::default(),
        }
    }

    /// Load every persisted room so it is available before anyone joins.
    pub async fn recover(&self) -> Result<usize, CollabError> {
        let Some(store) = &self.shared.store else {
            return Ok(0);
        };

        let names = store.list_rooms()?;
        let mut recovered = 0;
        let mut rooms = self.shared.rooms.write().await;
        for name in &names {
            let Some(snapshot) = store.load_room(name)? else {
                continue;
            };
            let room = rooms
                .entry(name.clone())
                .or_insert_with(|| RelayRoom::new(self.shared.capacity));
            match room.replica.apply_remote(&snapshot) {
                Ok(()) => {
                    recovered += 1;
                    log::info!("Recovered room {name} from storage");
                }
                Err(e) => log::warn!("Skipping unreadable snapshot for room {name}: {e}"),
            }
        }
        self.shared.stats.write().await.active_rooms = rooms.len();

        log::info!("Recovery complete: {recovered}/{} rooms restored", names.len());
        Ok(recovered)
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        self.recover().await?;
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.shared.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Current markdown text of a live room, if it is open.
    pub async fn room_markdown(&self, room: &str) -> Option<String> {
        let rooms = self.shared.rooms.read().await;
        rooms.get(room).map(|r| r.replica.markdown())
    }

    pub fn store(&self) -> Option<&Arc<RocksStore>> {
        self.shared.store.as_ref()
    }
}

// ─── Connection handling ─────────────────────────────────────────────

/// What a connection knows after its peer joined a room.
struct Membership {
    peer_id: Uuid,
    room: String,
    replica: Replica,
    broadcast: Arc<BroadcastGroup>,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Shared,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    log::info!("WebSocket connection established from {addr}");
    {
        let mut s = shared.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut membership: Option<Membership> = None;
    let mut broadcast_rx: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    let data = match msg {
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => continue,
                    };

                    let bytes: Vec<u8> = data.into();
                    {
                        let mut s = shared.stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += bytes.len() as u64;
                    }
                    let sync_msg = match SyncMessage::decode(&bytes) {
                        Ok(m) => m,
                        Err(e) => {
                            log::warn!("Failed to decode message from {addr}: {e}");
                            continue;
                        }
                    };

                    if sync_msg.msg_type == MessageType::PeerJoined && membership.is_none() {
                        let (joined, rx, replies) = join_room(&shared, &sync_msg).await?;
                        for reply in replies {
                            ws_sender.send(Message::Binary(reply.into())).await?;
                        }
                        membership = Some(joined);
                        broadcast_rx = Some(rx);
                        continue;
                    }

                    let Some(member) = &membership else {
                        log::debug!("Ignoring {:?} before join from {addr}", sync_msg.msg_type);
                        continue;
                    };
                    if let Some(reply) = handle_message(member, sync_msg, bytes).await? {
                        ws_sender.send(Message::Binary(reply.into())).await?;
                    }
                }

                msg = async {
                    match broadcast_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            let own = membership.as_ref().is_some_and(|m| {
                                SyncMessage::decode(&data).is_ok_and(|s| s.peer_id == m.peer_id)
                            });
                            if !own {
                                ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer from {addr} lagged by {n} messages");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    if let Some(member) = membership {
        leave_room(&shared, member).await;
    }
    shared.stats.write().await.active_connections -= 1;

    result
}

/// Register the peer in its room. Returns the membership, the broadcast
/// receiver and the messages to send straight back to the joiner.
async fn join_room(
    shared: &Shared,
    msg: &SyncMessage,
) -> Result<(Membership, broadcast::Receiver<Arc<Vec<u8>>>, Vec<Vec<u8>>), BoxError> {
    let (replica, group, room_count) = {
        let mut rooms = shared.rooms.write().await;
        if !rooms.contains_key(&msg.room) {
            let room = RelayRoom::new(shared.capacity);
            if let Some(store) = &shared.store {
                match store.load_room(&msg.room) {
                    Ok(Some(snapshot)) => match room.replica.apply_remote(&snapshot) {
                        Ok(()) => log::info!("Loaded persisted snapshot for room {}", msg.room),
                        Err(e) => log::warn!("Unreadable snapshot for room {}: {e}", msg.room),
                    },
                    Ok(None) => {}
                    Err(e) => log::error!("Failed to load room {}: {e}", msg.room),
                }
            }
            rooms.insert(msg.room.clone(), room);
        }
        let room = rooms
            .get(&msg.room)
            .ok_or_else(|| CollabError::Connection(format!("room {} vanished", msg.room)))?;
        (room.replica.clone(), room.broadcast.clone(), rooms.len())
    };

    let rx = group.add_peer(msg.peer_id).await;
    shared.stats.write().await.active_rooms = room_count;

    // Ask the joiner for whatever it has that we don't, and replay the
    // presence of everyone already in the room.
    let mut replies = vec![SyncMessage::sync_step1(Uuid::nil(), &msg.room, replica.state_vector()).encode()?];
    for awareness in group.awareness_except(&msg.peer_id).await {
        replies.push(awareness.to_vec());
    }

    group.broadcast(&SyncMessage::peer_joined(msg.peer_id, &msg.room))?;
    log::info!("Peer {} joined room {}", msg.peer_id, msg.room);

    Ok((
        Membership {
            peer_id: msg.peer_id,
            room: msg.room.clone(),
            replica,
            broadcast: group,
        },
        rx,
        replies,
    ))
}

/// Handle one message from a joined peer; may produce a direct reply.
async fn handle_message(
    member: &Membership,
    msg: SyncMessage,
    raw: Vec<u8>,
) -> Result<Option<Vec<u8>>, BoxError> {
    match msg.msg_type {
        MessageType::SyncStep1 => {
            let reply = match member.replica.diff_since(&msg.payload) {
                Ok(diff) => SyncMessage::sync_step2(Uuid::nil(), &member.room, diff),
                Err(e) => {
                    log::warn!("Bad state vector from {}: {e}", member.peer_id);
                    return Ok(None);
                }
            };
            Ok(Some(reply.encode()?))
        }

        MessageType::SyncStep2 | MessageType::Update => {
            if let Err(e) = member.replica.apply_remote(&msg.payload) {
                log::warn!("Dropping undecodable update from {}: {e}", member.peer_id);
                return Ok(None);
            }
            // Handshake answers reach the others as ordinary updates.
            member.broadcast.broadcast(&SyncMessage::update(
                member.peer_id,
                &member.room,
                msg.payload,
            ))?;
            Ok(None)
        }

        MessageType::Awareness => {
            let encoded = Arc::new(raw);
            member
                .broadcast
                .record_awareness(member.peer_id, encoded.clone())
                .await;
            member.broadcast.broadcast_raw(encoded);
            Ok(None)
        }

        MessageType::Ping => Ok(Some(SyncMessage::pong(member.peer_id).encode()?)),

        other => {
            log::debug!("Unhandled message type: {other:?}");
            Ok(None)
        }
    }
}

async fn leave_room(shared: &Shared, member: Membership) {
    let mut rooms = shared.rooms.write().await;
    member.broadcast.remove_peer(&member.peer_id).await;
    if let Err(e) = member
        .broadcast
        .broadcast(&SyncMessage::peer_left(member.peer_id, &member.room))
    {
        log::warn!("Failed to announce departure of {}: {e}", member.peer_id);
    }
    log::info!("Peer {} left room {}", member.peer_id, member.room);

    if member.broadcast.peer_count().await == 0 {
        if let Some(store) = &shared.store {
            match store.save_room(&member.room, &member.replica.encode_state()) {
                Ok(()) => {
                    shared.stats.write().await.persisted_snapshots += 1;
                    log::info!("Persisted snapshot for room {} (room closing)", member.room);
                }
                Err(e) => log::error!("Failed to persist room {}: {e}", member.room),
            }
        }
        rooms.remove(&member.room);
        log::info!("Room {} removed (empty)", member.room);
    }
    shared.stats.write().await.active_rooms = rooms.len();
}
