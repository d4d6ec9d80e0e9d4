use thiserror::Error;

use super::types::Direction;

/// Errors raised by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("password hash error: {0}")]
    Hash(String),

    /// Returned when a record carries a schema version newer than this build understands.
    #[error("schema mismatch for {entity}: expected at most {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },
}

/// Errors raised by structural room-graph operations.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("there is already a room {0}")]
    RoomExists(Direction),

    #[error("room {0} is no longer registered")]
    RoomGone(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}
