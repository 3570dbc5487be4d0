//! Binary protocol for CRDT synchronization between editors and the relay.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────┐
//! │ msg_type │ peer_id   │ room         │ payload  │
//! │ 1 byte   │ 16 bytes  │ len + utf-8  │ variable │
//! └──────────┴───────────┴──────────────┴──────────┘
//! ```
//!
//! Handshake follows the Yjs sync protocol: a joining peer sends its state
//! vector (`SyncStep1`), the other side answers with the missing diff
//! (`SyncStep2`). Afterwards every local change travels as an `Update`.
//! Presence rides on `Awareness` messages carrying a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector for initial sync handshake
    SyncStep1 = 1,
    /// Yrs state diff response
    SyncStep2 = 2,
    /// Incremental CRDT update
    Update = 3,
    /// Presence (awareness) state, JSON payload
    Awareness = 4,
    /// Peer joined notification
    PeerJoined = 5,
    /// Peer left notification
    PeerLeft = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub room: String,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, room: &str, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            room: room.to_string(),
            payload,
        }
    }

    /// Create an incremental update message.
    pub fn update(peer_id: Uuid, room: &str, yrs_update: Vec<u8>) -> Self {
        Self::new(MessageType::Update, peer_id, room, yrs_update)
    }

    /// Create a sync step 1 (state vector request).
    pub fn sync_step1(peer_id: Uuid, room: &str, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, peer_id, room, state_vector)
    }

    /// Create a sync step 2 (state diff response).
    pub fn sync_step2(peer_id: Uuid, room: &str, state_diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, peer_id, room, state_diff)
    }

    /// Create an awareness update carrying a JSON presence object.
    pub fn awareness(peer_id: Uuid, room: &str, state: &Value) -> Result<Self, ProtocolError> {
        let payload =
            serde_json::to_vec(state).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self::new(MessageType::Awareness, peer_id, room, payload))
    }

    pub fn peer_joined(peer_id: Uuid, room: &str) -> Self {
        Self::new(MessageType::PeerJoined, peer_id, room, Vec::new())
    }

    pub fn peer_left(peer_id: Uuid, room: &str) -> Self {
        Self::new(MessageType::PeerLeft, peer_id, room, Vec::new())
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self::new(MessageType::Ping, peer_id, "", Vec::new())
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self::new(MessageType::Pong, peer_id, "", Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the awareness payload.
    pub fn awareness_state(&self) -> Result<Value, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType);
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type")]
    InvalidMessageType,
    #[error("Connection closed")]
    ConnectionClosed,
}
