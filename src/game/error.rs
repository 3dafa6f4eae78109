use serde::{Deserialize, Serialize};

use crate::game::board::PlacementError;
use crate::game::state::Phase;

/// Error category reported to clients alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or out-of-turn command; retry with corrected input
    Validation,
    /// Not enough action points
    Resource,
    /// Target already committed elsewhere; re-observe before retrying
    StateConflict,
    /// Negotiation exceeded its round-trip cap
    NegotiationExpired,
}

/// Rejection of an in-game command; rejected commands never mutate the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("Game has already ended")]
    GameEnded,
    #[error("Only players may do that")]
    NotAParticipant,
    #[error("Not your turn")]
    NotYourTurn,
    #[error("Action not allowed during {0:?}")]
    WrongPhase(Phase),
    #[error("Action not supported in this mode")]
    UnsupportedAction,
    #[error("Illegal move: {0}")]
    IllegalMove(#[from] PlacementError),
    #[error("Invalid target: {0}")]
    InvalidTarget(&'static str),
    #[error("Choice already submitted")]
    AlreadySubmitted,
    #[error("No {0} left")]
    NoUsesLeft(&'static str),
    #[error("Please wait {0} ms")]
    Cooldown(i64),
    #[error("Only AI games can be paused")]
    NotAiGame,
    #[error("Game is not paused")]
    NotPaused,
    #[error("Game is already paused")]
    AlreadyPaused,
    #[error("Game is paused")]
    Paused,
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::SessionNotFound | ActionError::GameEnded => ErrorKind::StateConflict,
            _ => ErrorKind::Validation,
        }
    }
}
