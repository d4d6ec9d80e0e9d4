use thiserror::Error;

use crate::lock::LockError;
use crate::world::{StoreError, WorldError};

/// Errors a mode handler can return for one line of input.
#[derive(Debug, Error)]
pub enum MudError {
    /// The first word is not a command in the current mode.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Bad user input; the message is shown verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    World(#[from] WorldError),

    /// The session lock could not be taken within the configured wait.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl MudError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MudError::Validation(msg.into())
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            MudError::Storage(_) | MudError::World(WorldError::Storage(_))
        )
    }
}
