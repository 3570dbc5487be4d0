//! WebSocket provider for connecting a replica to a relay room.
//!
//! Provides:
//! - Connection lifecycle (connect, reconnect with backoff, leave)
//! - Yjs-style handshake: our state vector out, the relay's diff in, and
//!   the reverse
//! - Incremental updates in both directions
//! - Presence (awareness) publishing and tracking
//! - Offline queue for edits made while disconnected
//!
//! Everything runs on one tokio task per connection; the handle talks to it
//! through a command channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use yrs::Subscription;

use crate::error::CollabError;
use crate::presence::PresenceRoom;
use crate::protocol::{MessageType, SyncMessage};
use crate::provider::{ConnectionState, ProviderHandle, SyncProvider};
use crate::replica::Replica;

/// Offline queue for updates made while disconnected.
///
/// Queued updates are replayed on reconnection. The handshake already
/// carries any state the relay lacks, so an overflowing queue only drops
/// redundancy.
pub struct OfflineQueue {
    queue: VecDeque<Vec<u8>>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an update for later replay. Returns `false` when full.
    pub fn enqueue(&mut self, update: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(update);
        true
    }

    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(Vec::len).sum()
    }
}

/// Provider that syncs through a relay at `{url}/{room}`.
#[derive(Debug, Clone)]
pub struct WebsocketProvider {
    url: String,
    retry_delay: Duration,
    queue_capacity: usize,
}

impl WebsocketProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_delay: Duration::from_secs(2),
            queue_capacity: 10_000,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SyncProvider for WebsocketProvider {
    fn connect(&self, room: &str, replica: &Replica) -> Result<Box<dyn ProviderHandle>, CollabError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CollabError::Connection(e.to_string()))?;

        let peer_id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Connecting);
        let presence = Arc::new(Mutex::new(PresenceRoom::new(peer_id)));

        let outgoing = cmd_tx.clone();
        let subscription = replica.observe_outgoing(move |update| {
            let _ = outgoing.send(Command::Update(update));
        })?;

        let connection = Connection {
            url: format!("{}/{}", self.url.trim_end_matches('/'), room),
            room: room.to_string(),
            peer_id,
            replica: replica.clone(),
            commands: cmd_rx,
            queue: OfflineQueue::new(self.queue_capacity),
            awareness: None,
            presence: presence.clone(),
            status: status_tx,
            retry_delay: self.retry_delay,
        };
        runtime.spawn(connection.run());

        Ok(Box::new(WebsocketHandle {
            peer_id,
            commands: cmd_tx,
            status: status_rx,
            presence,
            subscription: Some(subscription),
        }))
    }
}

enum Command {
    Update(Vec<u8>),
    Awareness(Value),
    Shutdown,
}

struct WebsocketHandle {
    peer_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    presence: Arc<Mutex<PresenceRoom>>,
    subscription: Option<Subscription>,
}

impl ProviderHandle for WebsocketHandle {
    fn set_local_state_field(&mut self, field: &str, value: Value) {
        let Ok(mut presence) = self.presence.lock() else { return };
        let state = presence.set_local_field(field, value);
        let _ = self.commands.send(Command::Awareness(state));
    }

    fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    fn remote_states(&self) -> Vec<Value> {
        self.presence
            .lock()
            .map(|p| p.remote_states())
            .unwrap_or_default()
    }

    fn destroy(&mut self) {
        if self.subscription.take().is_some() {
            let _ = self.commands.send(Command::Shutdown);
            log::debug!("Peer {} leaving relay room", self.peer_id);
        }
    }
}

impl Drop for WebsocketHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ─── Connection task ─────────────────────────────────────────────────

enum Exit {
    Shutdown,
    Lost,
}

struct Connection {
    url: String,
    room: String,
    peer_id: Uuid,
    replica: Replica,
    commands: mpsc::UnboundedReceiver<Command>,
    queue: OfflineQueue,
    /// Last published presence state, re-sent after reconnecting.
    awareness: Option<Value>,
    presence: Arc<Mutex<PresenceRoom>>,
    status: watch::Sender<ConnectionState>,
    retry_delay: Duration,
}

impl Connection {
    async fn run(mut self) {
        loop {
            self.status.send_replace(ConnectionState::Connecting);
            let url = self.url.clone();
            let exit = tokio::select! {
                result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                    Ok((ws_stream, _)) => {
                        self.status.send_replace(ConnectionState::Connected);
                        log::info!("Connected to relay room {}", self.room);
                        let exit = self.live(ws_stream).await;
                        self.forget_peers();
                        exit
                    }
                    Err(e) => {
                        log::warn!("Relay connection to {} failed: {e}", self.url);
                        Exit::Lost
                    }
                },
                exit = self.idle_until_shutdown() => exit,
            };

            self.status.send_replace(ConnectionState::Disconnected);
            if matches!(exit, Exit::Shutdown) {
                log::info!("Left relay room {}", self.room);
                return;
            }

            let retry = tokio::time::sleep(self.retry_delay);
            tokio::pin!(retry);
            tokio::select! {
                _ = &mut retry => {}
                Exit::Shutdown = self.idle_until_shutdown() => return,
            }
        }
    }

    /// Absorb commands while offline; resolves only on shutdown.
    async fn idle_until_shutdown(&mut self) -> Exit {
        loop {
            match self.commands.recv().await {
                Some(Command::Update(update)) => {
                    if !self.queue.enqueue(update) {
                        log::debug!("Offline queue full; relying on handshake");
                    }
                }
                Some(Command::Awareness(state)) => self.awareness = Some(state),
                Some(Command::Shutdown) | None => return Exit::Shutdown,
            }
        }
    }

    async fn live(&mut self, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Exit {
        let (mut writer, mut reader) = ws_stream.split();

        let mut opening = vec![
            SyncMessage::peer_joined(self.peer_id, &self.room),
            SyncMessage::sync_step1(self.peer_id, &self.room, self.replica.state_vector()),
        ];
        let queued = self.queue.drain();
        if !queued.is_empty() {
            log::info!("Replaying {} queued updates", queued.len());
        }
        opening.extend(
            queued
                .into_iter()
                .map(|update| SyncMessage::update(self.peer_id, &self.room, update)),
        );
        if let Some(state) = &self.awareness {
            match SyncMessage::awareness(self.peer_id, &self.room, state) {
                Ok(msg) => opening.push(msg),
                Err(e) => log::warn!("Cannot encode presence: {e}"),
            }
        }
        for msg in opening {
            if !send(&mut writer, &msg).await {
                return Exit::Lost;
            }
        }

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Update(update)) => {
                        let msg = SyncMessage::update(self.peer_id, &self.room, update.clone());
                        if !send(&mut writer, &msg).await {
                            self.queue.enqueue(update);
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Awareness(state)) => {
                        let msg = match SyncMessage::awareness(self.peer_id, &self.room, &state) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("Cannot encode presence: {e}");
                                continue;
                            }
                        };
                        self.awareness = Some(state);
                        if !send(&mut writer, &msg).await {
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = send(&mut writer, &SyncMessage::peer_left(self.peer_id, &self.room)).await;
                        let _ = writer.send(Message::Close(None)).await;
                        return Exit::Shutdown;
                    }
                },

                msg = reader.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        match SyncMessage::decode(&bytes) {
                            Ok(sync_msg) => {
                                if let Some(reply) = self.handle_incoming(sync_msg) {
                                    if !send(&mut writer, &reply).await {
                                        return Exit::Lost;
                                    }
                                }
                            }
                            Err(e) => log::warn!("Failed to decode relay message: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Exit::Lost,
                    Some(Err(e)) => {
                        log::warn!("Relay connection error: {e}");
                        return Exit::Lost;
                    }
                    _ => {}
                },
            }
        }
    }

    fn handle_incoming(&mut self, msg: SyncMessage) -> Option<SyncMessage> {
        if msg.peer_id == self.peer_id {
            return None;
        }
        match msg.msg_type {
            MessageType::SyncStep1 => match self.replica.diff_since(&msg.payload) {
                Ok(diff) => Some(SyncMessage::sync_step2(self.peer_id, &self.room, diff)),
                Err(e) => {
                    log::warn!("Bad state vector from relay: {e}");
                    None
                }
            },
            MessageType::SyncStep2 | MessageType::Update => {
                if let Err(e) = self.replica.apply_remote(&msg.payload) {
                    log::warn!("Dropping undecodable update from {}: {e}", msg.peer_id);
                }
                None
            }
            MessageType::Awareness | MessageType::PeerLeft => {
                if let Ok(mut presence) = self.presence.lock() {
                    presence.handle_message(&msg);
                }
                None
            }
            _ => None,
        }
    }

    fn forget_peers(&self) {
        if let Ok(mut presence) = self.presence.lock() {
            presence.clear_remote();
        }
    }
}

async fn send<W>(writer: &mut W, msg: &SyncMessage) -> bool
where
    W: futures_util::Sink<Message> + Unpin,
{
    match msg.encode() {
        Ok(bytes) => writer.send(Message::Binary(bytes.into())).await.is_ok(),
        Err(e) => {
            log::warn!("Failed to encode {:?}: {e}", msg.msg_type);
            true
        }
    }
}
