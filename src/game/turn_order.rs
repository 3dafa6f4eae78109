//! Turn-order resolution
//!
//! `Preference -> Draw (rock-paper-scissors, up to 3 rounds) -> StartConfirmation
//! -> Complete`. Every stage has an absolute deadline; `advance` substitutes a
//! random choice for any side that missed it.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::game::constants::turn_order::{
    DRAW_WINDOW_MS, MAX_DRAW_ROUNDS, PREFERENCE_WINDOW_MS, START_CONFIRMATION_MS,
};
use crate::game::error::ActionError;
use crate::game::state::{Phase, Slot, SlotPair};
use crate::util::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPreference {
    First,
    Second,
}

impl TurnPreference {
    fn random(rng: &mut dyn RngCore) -> Self {
        if rng.gen_bool(0.5) {
            TurnPreference::First
        } else {
            TurnPreference::Second
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpsChoice {
    Rock,
    Paper,
    Scissors,
}

impl RpsChoice {
    pub fn beats(self, other: RpsChoice) -> bool {
        matches!(
            (self, other),
            (RpsChoice::Rock, RpsChoice::Scissors)
                | (RpsChoice::Paper, RpsChoice::Rock)
                | (RpsChoice::Scissors, RpsChoice::Paper)
        )
    }

    fn random(rng: &mut dyn RngCore) -> Self {
        match rng.gen_range(0..3) {
            0 => RpsChoice::Rock,
            1 => RpsChoice::Paper,
            _ => RpsChoice::Scissors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOrderStage {
    Preference,
    Draw,
    StartConfirmation,
    Complete,
}

/// Something the session must react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOrderEvent {
    /// Nothing changed that the session needs to apply
    Pending,
    /// The seat moving first is known
    FirstDecided(Slot),
    /// Play may begin
    Started,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOrderState {
    pub stage: TurnOrderStage,
    pub deadline: Timestamp,
    pub preferences: SlotPair<Option<TurnPreference>>,
    pub draw_choices: SlotPair<Option<RpsChoice>>,
    pub draw_round: u8,
    /// Completed draw rounds as (player1, player2)
    pub draw_history: Vec<(RpsChoice, RpsChoice)>,
    pub draw_winner: Option<Slot>,
    pub first: Option<Slot>,
    pub confirmations: SlotPair<bool>,
    pub with_confirmation: bool,
}

impl TurnOrderState {
    pub fn new(now: Timestamp, with_confirmation: bool) -> Self {
        Self {
            stage: TurnOrderStage::Preference,
            deadline: now + PREFERENCE_WINDOW_MS,
            preferences: SlotPair::default(),
            draw_choices: SlotPair::default(),
            draw_round: 0,
            draw_history: Vec::new(),
            draw_winner: None,
            first: None,
            confirmations: SlotPair::default(),
            with_confirmation,
        }
    }

    /// Colours already fixed; only the start acknowledgement remains
    pub fn confirmation_only(first: Slot, now: Timestamp) -> Self {
        Self {
            stage: TurnOrderStage::StartConfirmation,
            deadline: now + START_CONFIRMATION_MS,
            first: Some(first),
            with_confirmation: true,
            ..Self::new(now, true)
        }
    }

    pub fn phase(&self) -> Phase {
        match self.stage {
            TurnOrderStage::Preference => Phase::TurnPreferenceSelection,
            TurnOrderStage::Draw => Phase::RockPaperScissors,
            TurnOrderStage::StartConfirmation => Phase::StartConfirmation,
            TurnOrderStage::Complete => Phase::Playing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == TurnOrderStage::Complete
    }

    pub fn submit_preference(
        &mut self,
        slot: Slot,
        preference: TurnPreference,
        now: Timestamp,
    ) -> Result<TurnOrderEvent, ActionError> {
        if self.stage != TurnOrderStage::Preference {
            return Err(ActionError::WrongPhase(self.phase()));
        }
        let entry = self.preferences.get_mut(slot);
        if entry.is_some() {
            return Err(ActionError::AlreadySubmitted);
        }
        *entry = Some(preference);
        Ok(self.resolve_preferences(now))
    }

    pub fn submit_draw(
        &mut self,
        slot: Slot,
        choice: RpsChoice,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Result<TurnOrderEvent, ActionError> {
        if self.stage != TurnOrderStage::Draw {
            return Err(ActionError::WrongPhase(self.phase()));
        }
        let entry = self.draw_choices.get_mut(slot);
        if entry.is_some() {
            return Err(ActionError::AlreadySubmitted);
        }
        *entry = Some(choice);
        Ok(self.resolve_draw(now, rng))
    }

    pub fn confirm_start(&mut self, slot: Slot) -> Result<TurnOrderEvent, ActionError> {
        if self.stage != TurnOrderStage::StartConfirmation {
            return Err(ActionError::WrongPhase(self.phase()));
        }
        let entry = self.confirmations.get_mut(slot);
        if *entry {
            return Err(ActionError::AlreadySubmitted);
        }
        *entry = true;
        if self.confirmations.player1 && self.confirmations.player2 {
            self.stage = TurnOrderStage::Complete;
            return Ok(TurnOrderEvent::Started);
        }
        Ok(TurnOrderEvent::Pending)
    }

    /// Resolve an expired stage, substituting random choices for non-responders
    pub fn advance(&mut self, now: Timestamp, rng: &mut dyn RngCore) -> TurnOrderEvent {
        if self.stage == TurnOrderStage::Complete || now < self.deadline {
            return TurnOrderEvent::Pending;
        }
        match self.stage {
            TurnOrderStage::Preference => {
                for slot in Slot::BOTH {
                    let entry = self.preferences.get_mut(slot);
                    if entry.is_none() {
                        *entry = Some(TurnPreference::random(rng));
                    }
                }
                self.resolve_preferences(now)
            }
            TurnOrderStage::Draw => {
                for slot in Slot::BOTH {
                    let entry = self.draw_choices.get_mut(slot);
                    if entry.is_none() {
                        *entry = Some(RpsChoice::random(rng));
                    }
                }
                self.resolve_draw(now, rng)
            }
            TurnOrderStage::StartConfirmation => {
                self.stage = TurnOrderStage::Complete;
                TurnOrderEvent::Started
            }
            TurnOrderStage::Complete => TurnOrderEvent::Pending,
        }
    }

    fn resolve_preferences(&mut self, now: Timestamp) -> TurnOrderEvent {
        let (Some(p1), Some(p2)) = (self.preferences.player1, self.preferences.player2) else {
            return TurnOrderEvent::Pending;
        };
        if p1 != p2 {
            let first = if p1 == TurnPreference::First {
                Slot::Player1
            } else {
                Slot::Player2
            };
            return self.decide(first, now);
        }
        self.stage = TurnOrderStage::Draw;
        self.draw_round = 1;
        self.deadline = now + DRAW_WINDOW_MS;
        TurnOrderEvent::Pending
    }

    fn resolve_draw(&mut self, now: Timestamp, rng: &mut dyn RngCore) -> TurnOrderEvent {
        let (Some(c1), Some(c2)) = (self.draw_choices.player1, self.draw_choices.player2) else {
            return TurnOrderEvent::Pending;
        };
        self.draw_history.push((c1, c2));
        self.draw_choices = SlotPair::default();

        let winner = if c1.beats(c2) {
            Slot::Player1
        } else if c2.beats(c1) {
            Slot::Player2
        } else if self.draw_round >= MAX_DRAW_ROUNDS {
            if rng.gen_bool(0.5) {
                Slot::Player1
            } else {
                Slot::Player2
            }
        } else {
            self.draw_round += 1;
            self.deadline = now + DRAW_WINDOW_MS;
            return TurnOrderEvent::Pending;
        };

        self.draw_winner = Some(winner);
        let wanted = self
            .preferences
            .get(winner)
            .unwrap_or(TurnPreference::First);
        let first = match wanted {
            TurnPreference::First => winner,
            TurnPreference::Second => winner.other(),
        };
        self.decide(first, now)
    }

    fn decide(&mut self, first: Slot, now: Timestamp) -> TurnOrderEvent {
        self.first = Some(first);
        if self.with_confirmation {
            self.stage = TurnOrderStage::StartConfirmation;
            self.deadline = now + START_CONFIRMATION_MS;
        } else {
            self.stage = TurnOrderStage::Complete;
        }
        TurnOrderEvent::FirstDecided(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_different_preferences_assign_directly() {
        let mut state = TurnOrderState::new(0, false);

        let e = state
            .submit_preference(Slot::Player1, TurnPreference::Second, 100)
            .unwrap();
        assert_eq!(e, TurnOrderEvent::Pending);

        let e = state
            .submit_preference(Slot::Player2, TurnPreference::First, 200)
            .unwrap();
        assert_eq!(e, TurnOrderEvent::FirstDecided(Slot::Player2));
        assert!(state.is_complete());
    }

    #[test]
    fn test_equal_preferences_always_go_to_draw() {
        for pref in [TurnPreference::First, TurnPreference::Second] {
            let mut state = TurnOrderState::new(0, false);
            state.submit_preference(Slot::Player1, pref, 10).unwrap();
            let e = state.submit_preference(Slot::Player2, pref, 20).unwrap();

            assert_eq!(e, TurnOrderEvent::Pending);
            assert_eq!(state.stage, TurnOrderStage::Draw);
            assert_eq!(state.phase(), Phase::RockPaperScissors);
            assert_eq!(state.first, None);
        }
    }

    #[test]
    fn test_draw_winner_gets_preference() {
        let mut rng = rng();
        let mut state = TurnOrderState::new(0, false);
        state
            .submit_preference(Slot::Player1, TurnPreference::Second, 0)
            .unwrap();
        state
            .submit_preference(Slot::Player2, TurnPreference::Second, 0)
            .unwrap();

        state
            .submit_draw(Slot::Player1, RpsChoice::Paper, 0, &mut rng)
            .unwrap();
        let e = state
            .submit_draw(Slot::Player2, RpsChoice::Rock, 0, &mut rng)
            .unwrap();

        // Player1 won and wanted to go second
        assert_eq!(state.draw_winner, Some(Slot::Player1));
        assert_eq!(e, TurnOrderEvent::FirstDecided(Slot::Player2));
    }

    #[test]
    fn test_draw_ties_repeat_then_random_pick() {
        let mut rng = rng();
        let mut state = TurnOrderState::new(0, false);
        state
            .submit_preference(Slot::Player1, TurnPreference::First, 0)
            .unwrap();
        state
            .submit_preference(Slot::Player2, TurnPreference::First, 0)
            .unwrap();

        for round in 1..MAX_DRAW_ROUNDS {
            state
                .submit_draw(Slot::Player1, RpsChoice::Rock, 0, &mut rng)
                .unwrap();
            let e = state
                .submit_draw(Slot::Player2, RpsChoice::Rock, 0, &mut rng)
                .unwrap();
            assert_eq!(e, TurnOrderEvent::Pending);
            assert_eq!(state.draw_round, round + 1);
        }

        state
            .submit_draw(Slot::Player1, RpsChoice::Rock, 0, &mut rng)
            .unwrap();
        let e = state
            .submit_draw(Slot::Player2, RpsChoice::Rock, 0, &mut rng)
            .unwrap();
        assert!(matches!(e, TurnOrderEvent::FirstDecided(_)));
        assert_eq!(state.draw_history.len(), MAX_DRAW_ROUNDS as usize);
        assert_eq!(state.first, state.draw_winner);
    }

    #[test]
    fn test_duplicate_submission_rejected() {
        let mut rng = rng();
        let mut state = TurnOrderState::new(0, false);
        state
            .submit_preference(Slot::Player1, TurnPreference::First, 0)
            .unwrap();
        assert_eq!(
            state.submit_preference(Slot::Player1, TurnPreference::Second, 0),
            Err(ActionError::AlreadySubmitted)
        );
        assert_eq!(
            state.submit_draw(Slot::Player1, RpsChoice::Rock, 0, &mut rng),
            Err(ActionError::WrongPhase(Phase::TurnPreferenceSelection))
        );
    }

    #[test]
    fn test_deadline_substitutes_random_choice() {
        let mut rng = rng();
        let mut state = TurnOrderState::new(0, false);
        state
            .submit_preference(Slot::Player1, TurnPreference::First, 0)
            .unwrap();

        assert_eq!(
            state.advance(PREFERENCE_WINDOW_MS - 1, &mut rng),
            TurnOrderEvent::Pending
        );
        state.advance(PREFERENCE_WINDOW_MS, &mut rng);

        assert!(state.preferences.player2.is_some());
        assert_ne!(state.stage, TurnOrderStage::Preference);
    }

    #[test]
    fn test_start_confirmation_flow() {
        let mut state = TurnOrderState::new(0, true);
        state
            .submit_preference(Slot::Player1, TurnPreference::First, 0)
            .unwrap();
        let e = state
            .submit_preference(Slot::Player2, TurnPreference::Second, 1_000)
            .unwrap();
        assert_eq!(e, TurnOrderEvent::FirstDecided(Slot::Player1));
        assert_eq!(state.stage, TurnOrderStage::StartConfirmation);
        assert_eq!(state.deadline, 1_000 + START_CONFIRMATION_MS);

        assert_eq!(state.confirm_start(Slot::Player2), Ok(TurnOrderEvent::Pending));
        assert_eq!(state.confirm_start(Slot::Player1), Ok(TurnOrderEvent::Started));
        assert!(state.is_complete());
    }

    #[test]
    fn test_start_confirmation_expiry_starts() {
        let mut rng = rng();
        let mut state = TurnOrderState::confirmation_only(Slot::Player2, 0);
        assert_eq!(
            state.advance(START_CONFIRMATION_MS, &mut rng),
            TurnOrderEvent::Started
        );
        assert_eq!(state.first, Some(Slot::Player2));
    }

    #[test]
    fn test_rps_cycle() {
        use RpsChoice::*;
        for c in [Rock, Paper, Scissors] {
            let beaten = [Rock, Paper, Scissors].iter().filter(|o| c.beats(**o)).count();
            assert_eq!(beaten, 1);
            assert!(!c.beats(c));
        }
    }
}
