//! Typed errors for the reconciliation client.
//!
//! One enum per concern so the backend can decide what is transient
//! (send, transport) and what is just a bad record (ingest).

use thiserror::Error;

/// A raw record could not be turned into a `Message`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// History load failed.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("history request failed: {0}")]
    Request(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),
}

/// Outbound send failed or never acknowledged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SendError {
    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("send timed out after {0} ms")]
    Timeout(u64),

    #[error("send cancelled")]
    Cancelled,
}

/// Live transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,
}

/// User input rejected before it reaches the send path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("message too long (max {max} characters)")]
    MessageTooLong { max: usize },

    #[error("room id cannot be empty")]
    EmptyRoomId,

    #[error("room id contains invalid characters")]
    InvalidRoomId,

    #[error("no active room")]
    NoActiveRoom,

    #[error("unknown room: {0}")]
    UnknownRoom(String),

    #[error("no failed message with id {0}")]
    NotFailed(String),
}

/// Settings could not be read or written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}
