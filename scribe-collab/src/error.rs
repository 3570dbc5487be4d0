use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::storage::StoreError;

/// Errors raised by replicas, providers and sessions.
#[derive(Error, Debug, Clone)]
pub enum CollabError {
    /// CRDT bytes could not be decoded or applied.
    #[error("CRDT decode error: {0}")]
    Decode(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<yrs::encoding::read::Error> for CollabError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        CollabError::Decode(e.to_string())
    }
}
