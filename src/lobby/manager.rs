use hashbrown::HashMap;
use rand::RngCore;
use serde::Serialize;
use uuid::Uuid;

use crate::game::constants::negotiation::{MAX_TURN_COUNT, RESPONSE_WINDOW_MS};
use crate::game::modes::{create_session, SessionSeed};
use crate::game::state::{GameMode, GameSettings, Session, SessionCategory, UserId};
use crate::lobby::negotiation::{
    action_point_cost, Negotiation, NegotiationError, NegotiationId, NegotiationStatus,
};
use crate::lobby::player::{UserRegistry, UserStatus};
use crate::util::time::Timestamp;

/// Result of a successful accept
#[derive(Debug)]
pub struct AcceptOutcome {
    pub session: Session,
    /// Other negotiations dropped because a party is now in game
    pub cancelled: Vec<NegotiationId>,
}

/// Result of a decline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclineOutcome {
    /// Set when the opponent declined; only the challenger is told
    pub notify_challenger: Option<UserId>,
    pub removed: bool,
}

/// `NEGOTIATION_UPDATE` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationSnapshot {
    pub negotiations: Vec<Negotiation>,
    pub user_statuses: HashMap<UserId, UserStatus>,
}

/// Owns every live negotiation
#[derive(Debug, Default)]
pub struct NegotiationManager {
    negotiations: HashMap<NegotiationId, Negotiation>,
}

impl NegotiationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NegotiationId) -> Option<&Negotiation> {
        self.negotiations.get(&id)
    }

    pub fn len(&self) -> usize {
        self.negotiations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.negotiations.is_empty()
    }

    /// Create a draft from `challenger` to `opponent`
    pub fn propose(
        &mut self,
        users: &mut UserRegistry,
        challenger: UserId,
        opponent: UserId,
        mode: GameMode,
        settings: GameSettings,
        ranked: bool,
        now: Timestamp,
    ) -> Result<NegotiationId, NegotiationError> {
        if challenger == opponent {
            return Err(NegotiationError::InvalidTarget);
        }
        settings
            .validate(mode)
            .map_err(NegotiationError::InvalidSettings)?;

        // At most one draft per challenger
        let stale: Vec<NegotiationId> = self
            .negotiations
            .values()
            .filter(|n| n.challenger_id == challenger && n.status == NegotiationStatus::Draft)
            .map(|n| n.id)
            .collect();
        for id in stale {
            self.remove(users, id);
            tracing::debug!("Discarded stale draft {}", id);
        }

        if self.is_pending_party(challenger) {
            return Err(NegotiationError::AlreadyClaimed);
        }
        if !matches!(
            users.status(challenger),
            UserStatus::Waiting | UserStatus::Online
        ) {
            return Err(NegotiationError::ChallengerBusy);
        }
        if !users.status(opponent).is_challengeable() {
            return Err(NegotiationError::OpponentUnavailable);
        }
        let cost = action_point_cost(mode);
        if !users.has_points(challenger, cost) || !users.has_points(opponent, cost) {
            return Err(NegotiationError::InsufficientResource);
        }

        let negotiation = Negotiation::new(challenger, opponent, mode, settings, ranked, now);
        let id = negotiation.id;
        self.negotiations.insert(id, negotiation);
        users.set_status(challenger, UserStatus::Negotiating);
        tracing::info!(
            "Negotiation {} drafted: {} -> {} ({:?})",
            id,
            challenger,
            opponent,
            mode
        );
        Ok(id)
    }

    /// Challenger sends the draft to the opponent
    pub fn send(
        &mut self,
        users: &mut UserRegistry,
        id: NegotiationId,
        user: UserId,
        settings: GameSettings,
        now: Timestamp,
    ) -> Result<(), NegotiationError> {
        let negotiation = self.negotiations.get(&id).ok_or(NegotiationError::NotFound)?;
        if negotiation.challenger_id != user {
            return Err(NegotiationError::NotYourTurn);
        }
        if negotiation.status != NegotiationStatus::Draft {
            return Err(NegotiationError::WrongStatus("a draft"));
        }
        settings
            .validate(negotiation.mode)
            .map_err(NegotiationError::InvalidSettings)?;
        let opponent = negotiation.opponent_id;
        if self.is_pending_party(opponent) {
            return Err(NegotiationError::AlreadyClaimed);
        }
        if !users.status(opponent).is_challengeable() {
            return Err(NegotiationError::OpponentUnavailable);
        }

        let negotiation = self
            .negotiations
            .get_mut(&id)
            .ok_or(NegotiationError::NotFound)?;
        negotiation.settings = settings;
        negotiation.status = NegotiationStatus::Pending;
        negotiation.proposer_id = opponent;
        negotiation.turn_count = 0;
        negotiation.deadline = now + RESPONSE_WINDOW_MS;
        users.set_status(opponent, UserStatus::Negotiating);
        tracing::info!("Negotiation {} sent to {}", id, opponent);
        Ok(())
    }

    /// Current proposer answers with new settings
    pub fn counter(
        &mut self,
        users: &mut UserRegistry,
        id: NegotiationId,
        user: UserId,
        settings: GameSettings,
        now: Timestamp,
    ) -> Result<(), NegotiationError> {
        let negotiation = self
            .negotiations
            .get_mut(&id)
            .ok_or(NegotiationError::NotFound)?;
        if !negotiation.is_pending() {
            return Err(NegotiationError::WrongStatus("pending"));
        }
        if negotiation.proposer_id != user {
            return Err(NegotiationError::NotYourTurn);
        }
        settings
            .validate(negotiation.mode)
            .map_err(NegotiationError::InvalidSettings)?;

        if negotiation.turn_count + 1 >= MAX_TURN_COUNT {
            let negotiation = self.remove(users, id);
            if let Some(n) = negotiation {
                tracing::info!(
                    "Negotiation {} expired after {} counter-proposals",
                    id,
                    n.turn_count + 1
                );
            }
            return Err(NegotiationError::Expired);
        }

        let previous = std::mem::replace(&mut negotiation.settings, settings);
        negotiation.previous_settings = Some(previous);
        negotiation.proposer_id = negotiation.other_party(user);
        negotiation.turn_count += 1;
        negotiation.deadline = now + RESPONSE_WINDOW_MS;
        Ok(())
    }

    /// Current proposer accepts; builds the session
    pub fn accept(
        &mut self,
        users: &mut UserRegistry,
        id: NegotiationId,
        user: UserId,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Result<AcceptOutcome, NegotiationError> {
        let negotiation = self.negotiations.get(&id).ok_or(NegotiationError::NotFound)?;
        if !negotiation.is_pending() {
            return Err(NegotiationError::WrongStatus("pending"));
        }
        if negotiation.proposer_id != user {
            return Err(NegotiationError::NotYourTurn);
        }
        let (challenger, opponent) = (negotiation.challenger_id, negotiation.opponent_id);

        if users.status(challenger) != UserStatus::Negotiating {
            self.remove(users, id);
            tracing::info!("Negotiation {} cancelled: challenger left", id);
            return Err(NegotiationError::ChallengerLeft);
        }
        let cost = negotiation.action_point_cost();
        if !users.deduct_pair(challenger, opponent, cost) {
            return Err(NegotiationError::InsufficientResource);
        }

        let Some(negotiation) = self.negotiations.remove(&id) else {
            return Err(NegotiationError::NotFound);
        };
        let session = create_session(
            SessionSeed {
                id: Uuid::new_v4(),
                mode: negotiation.mode,
                settings: negotiation.settings,
                player1_id: challenger,
                player2_id: opponent,
                category: SessionCategory::Pvp,
                ranked: negotiation.ranked,
                rematch_of: negotiation.rematch_of,
            },
            now,
            rng,
        );
        users.set_status(challenger, UserStatus::InGame(session.id));
        users.set_status(opponent, UserStatus::InGame(session.id));

        let others: Vec<NegotiationId> = self
            .negotiations
            .values()
            .filter(|n| n.involves(challenger) || n.involves(opponent))
            .map(|n| n.id)
            .collect();
        for other in &others {
            self.remove(users, *other);
        }

        tracing::info!(
            "Negotiation {} accepted -> session {} ({} other negotiations cancelled)",
            id,
            session.id,
            others.len()
        );
        Ok(AcceptOutcome {
            session,
            cancelled: others,
        })
    }

    /// Either party walks away. Unknown ids are a no-op.
    pub fn decline(
        &mut self,
        users: &mut UserRegistry,
        id: NegotiationId,
        user: UserId,
    ) -> Result<DeclineOutcome, NegotiationError> {
        let Some(negotiation) = self.negotiations.get(&id) else {
            return Ok(DeclineOutcome::default());
        };
        if !negotiation.involves(user) {
            return Err(NegotiationError::NotYourTurn);
        }
        let challenger = negotiation.challenger_id;
        self.remove(users, id);

        tracing::info!("Negotiation {} declined by {}", id, user);
        Ok(DeclineOutcome {
            notify_challenger: (user != challenger).then_some(challenger),
            removed: true,
        })
    }

    /// Rematch after a finished PvP session; goes straight to the opponent
    pub fn request_rematch(
        &mut self,
        users: &mut UserRegistry,
        original: &Session,
        user: UserId,
        now: Timestamp,
    ) -> Result<NegotiationId, NegotiationError> {
        if original.category != SessionCategory::Pvp {
            return Err(NegotiationError::RematchUnavailable("not a player match"));
        }
        if !original.is_ended() {
            return Err(NegotiationError::RematchUnavailable("game still running"));
        }
        let slot = original
            .slot_of(user)
            .ok_or(NegotiationError::RematchUnavailable("not a participant"))?;
        let opponent = original.user_in_slot(slot.other());
        let in_original = UserStatus::InGame(original.id);
        if users.status(user) != in_original || users.status(opponent) != in_original {
            return Err(NegotiationError::OpponentUnavailable);
        }
        if self.is_pending_party(user) || self.is_pending_party(opponent) {
            return Err(NegotiationError::AlreadyClaimed);
        }
        let cost = action_point_cost(original.mode);
        if !users.has_points(user, cost) || !users.has_points(opponent, cost) {
            return Err(NegotiationError::InsufficientResource);
        }

        let mut negotiation = Negotiation::new(
            user,
            opponent,
            original.mode,
            original.settings.clone(),
            original.ranked,
            now,
        );
        negotiation.rematch_of = Some(original.id);
        negotiation.status = NegotiationStatus::Pending;
        negotiation.proposer_id = opponent;
        let id = negotiation.id;
        self.negotiations.insert(id, negotiation);
        users.set_status(user, UserStatus::Negotiating);
        users.set_status(opponent, UserStatus::Negotiating);
        tracing::info!("Rematch {} of session {} requested by {}", id, original.id, user);
        Ok(id)
    }

    /// Drop negotiations whose deadline passed. Returns the removed ids.
    pub fn advance(&mut self, users: &mut UserRegistry, now: Timestamp) -> Vec<NegotiationId> {
        let expired: Vec<NegotiationId> = self
            .negotiations
            .values()
            .filter(|n| n.is_expired(now))
            .map(|n| n.id)
            .collect();
        for id in &expired {
            self.remove(users, *id);
            tracing::debug!("Negotiation {} lapsed", id);
        }
        expired
    }

    /// Negotiations involving `user` (for disconnect cleanup)
    pub fn involving(&self, user: UserId) -> Vec<NegotiationId> {
        self.negotiations
            .values()
            .filter(|n| n.involves(user))
            .map(|n| n.id)
            .collect()
    }

    pub fn snapshot(&self, users: &UserRegistry) -> NegotiationSnapshot {
        let mut negotiations: Vec<Negotiation> = self.negotiations.values().cloned().collect();
        negotiations.sort_by_key(|n| n.created_at);
        NegotiationSnapshot {
            negotiations,
            user_statuses: users.statuses(),
        }
    }

    fn is_pending_party(&self, user: UserId) -> bool {
        self.negotiations
            .values()
            .any(|n| n.is_pending() && n.involves(user))
    }

    /// Delete and return both parties to where they were
    fn remove(&mut self, users: &mut UserRegistry, id: NegotiationId) -> Option<Negotiation> {
        let negotiation = self.negotiations.remove(&id)?;
        let restore = match negotiation.rematch_of {
            Some(original) => UserStatus::InGame(original),
            None => UserStatus::Waiting,
        };
        for party in [negotiation.challenger_id, negotiation.opponent_id] {
            // Only identities this negotiation put on hold
            if users.status(party) == UserStatus::Negotiating && !self.holds(party) {
                users.set_status(party, restore);
            }
        }
        Some(negotiation)
    }

    /// Whether another live negotiation still keeps `user` negotiating
    fn holds(&self, user: UserId) -> bool {
        self.negotiations
            .values()
            .any(|n| n.challenger_id == user || (n.is_pending() && n.opponent_id == user))
    }
}
