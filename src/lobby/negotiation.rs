//! Challenge negotiation record

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::constants::negotiation::{
    PLAYFUL_ACTION_POINT_COST, RESPONSE_WINDOW_MS, STRATEGIC_ACTION_POINT_COST,
};
use crate::game::error::ErrorKind;
use crate::game::state::{GameMode, GameSettings, ModeCategory, SessionId, UserId};
use crate::util::time::Timestamp;

pub type NegotiationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Only the challenger may edit
    Draft,
    /// Waiting on `proposer_id`
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    pub id: NegotiationId,
    pub challenger_id: UserId,
    pub opponent_id: UserId,
    pub mode: GameMode,
    pub settings: GameSettings,
    pub previous_settings: Option<GameSettings>,
    pub ranked: bool,
    pub status: NegotiationStatus,
    pub proposer_id: UserId,
    pub turn_count: u32,
    pub deadline: Timestamp,
    pub rematch_of: Option<SessionId>,
    pub created_at: Timestamp,
}

impl Negotiation {
    pub fn new(
        challenger_id: UserId,
        opponent_id: UserId,
        mode: GameMode,
        settings: GameSettings,
        ranked: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            challenger_id,
            opponent_id,
            mode,
            settings,
            previous_settings: None,
            ranked,
            status: NegotiationStatus::Draft,
            proposer_id: challenger_id,
            turn_count: 0,
            deadline: now + RESPONSE_WINDOW_MS,
            rematch_of: None,
            created_at: now,
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.challenger_id == user || self.opponent_id == user
    }

    pub fn other_party(&self, user: UserId) -> UserId {
        if user == self.challenger_id {
            self.opponent_id
        } else {
            self.challenger_id
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == NegotiationStatus::Pending
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }

    pub fn action_point_cost(&self) -> u32 {
        action_point_cost(self.mode)
    }
}

/// Cost charged to each side when the match starts
pub fn action_point_cost(mode: GameMode) -> u32 {
    match mode.category() {
        ModeCategory::Strategic => STRATEGIC_ACTION_POINT_COST,
        ModeCategory::Playful => PLAYFUL_ACTION_POINT_COST,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("Negotiation not found")]
    NotFound,
    #[error("Cannot challenge yourself")]
    InvalidTarget,
    #[error("Opponent is not available")]
    OpponentUnavailable,
    #[error("Not enough action points")]
    InsufficientResource,
    #[error("Finish the current game first")]
    ChallengerBusy,
    #[error("Opponent is already in another negotiation")]
    AlreadyClaimed,
    #[error("Waiting for the other side")]
    NotYourTurn,
    #[error("Negotiation is not {0}")]
    WrongStatus(&'static str),
    #[error("Negotiation expired after too many counter-proposals")]
    Expired,
    #[error("Challenger is no longer available")]
    ChallengerLeft,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Rematch not possible: {0}")]
    RematchUnavailable(&'static str),
}

impl NegotiationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NegotiationError::InsufficientResource => ErrorKind::Resource,
            NegotiationError::Expired => ErrorKind::NegotiationExpired,
            NegotiationError::NotFound
            | NegotiationError::OpponentUnavailable
            | NegotiationError::AlreadyClaimed
            | NegotiationError::ChallengerBusy
            | NegotiationError::ChallengerLeft => ErrorKind::StateConflict,
            _ => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_by_category() {
        assert_eq!(action_point_cost(GameMode::Standard), 2);
        assert_eq!(action_point_cost(GameMode::Missile), 2);
        assert_eq!(action_point_cost(GameMode::Curling), 3);
        assert_eq!(action_point_cost(GameMode::Thief), 3);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(NegotiationError::NotFound.kind(), ErrorKind::StateConflict);
        assert_eq!(
            NegotiationError::InsufficientResource.kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            NegotiationError::Expired.kind(),
            ErrorKind::NegotiationExpired
        );
        assert_eq!(NegotiationError::InvalidTarget.kind(), ErrorKind::Validation);
    }
}
