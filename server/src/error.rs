use crate::client_manager::ClientId;
use shared::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The request does not fit the current state of its target.
    #[error("{0}")]
    State(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u32 },

    #[error("{0}")]
    Rejected(String),

    #[error("participant {0} left")]
    ParticipantLoss(ClientId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ArenaError {
    pub fn state(message: impl Into<String>) -> Self {
        ArenaError::State(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ArenaError::Rejected(message.into())
    }

    /// Whether the sender gets an `error` frame. State errors and lost
    /// participants are only logged.
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            ArenaError::Protocol(_) | ArenaError::NotFound { .. } | ArenaError::Rejected(_)
        )
    }
}
