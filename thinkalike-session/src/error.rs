use crate::commit::CodecError;
use crate::rest::ApiError;

/// Errors returned by [`GameClient`](crate::GameClient) actions.
///
/// Validation errors are raised before anything touches the network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Username cannot be empty")]
    EmptyUsername,
    #[error("Must be logged in")]
    NotAuthenticated,
    #[error("Not connected to the game server")]
    NotConnected,
    #[error("Not in a room")]
    NotInRoom,
    #[error("Already in a room")]
    AlreadyInRoom,
    #[error("Already committed this round")]
    AlreadyCommitted,
    #[error("Choice {index} out of range ({available} nouns)")]
    InvalidChoice { index: usize, available: usize },
    #[error("Nothing to reveal")]
    NothingToReveal,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SessionError {
    /// Whether this error was detected locally, without any network call.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SessionError::Api(_) | SessionError::Codec(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
