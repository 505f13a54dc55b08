//! Error types shared by the storage node and the discovery service.
//!
//! - `StoreError` is what a client of the storage node sees.
//! - `PeerError` is the outcome of a single node-to-node RPC. It never reaches
//!   the client that issued the write; the replica set coordinator consumes it.
//! - `ClusterError` is returned by the discovery service's state machine.

use thiserror::Error;

/// Failures of local storage or of the change log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Missing collection, key or change id.
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate collection.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// I/O or log durability failure. The write is not durably committed.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unexpected(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Unexpected(e.to_string())
    }
}

/// Outcome classification of a failed RPC to another node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The peer was reached but rejected the request or answered garbage.
    #[error("peer rejected request (status {status}): {message}")]
    Unhealthy { status: u16, message: String },

    /// The peer could not be reached at all (connect, timeout, transport).
    #[error("peer unavailable: {0}")]
    Unavailable(String),
}

impl PeerError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PeerError::Unavailable(_))
    }
}

/// Errors produced by the discovery service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("leader is changing")]
    LeaderChanging,

    #[error(transparent)]
    Peer(#[from] PeerError),
}
