//! Thief/police dice driver
//!
//! The thief (first seat, black) rolls one die and the police two; the roll is
//! the placement budget for the turn. Thief stones must grow from existing
//! thief stones, police stones must land on a thief liberty.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::board::Point;
use crate::game::constants::thief::{POLICE_DICE, REGULAR_ROUNDS, ROUND_SUMMARY_MS, THIEF_DICE};
use crate::game::dispatch::{ActionResponse, GameAction};
use crate::game::error::ActionError;
use crate::game::modes::{advance_setup, seat_players, ModeDriver};
use crate::game::state::{
    Color, ColorPair, FinalScore, ModeExtension, MoveKind, Phase, Session, WinReason,
};
use crate::game::turn_order::TurnPreference;
use crate::util::time::{is_past, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThiefRole {
    Thief,
    Police,
}

impl ThiefRole {
    /// Role choice maps onto the turn-order preference: the thief moves first
    pub fn as_preference(self) -> TurnPreference {
        match self {
            ThiefRole::Thief => TurnPreference::First,
            ThiefRole::Police => TurnPreference::Second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThiefRoundScore {
    pub round: u32,
    pub thief: Color,
    /// Thief stones left on the board
    pub thief_score: u32,
    /// Thief stones captured by the police
    pub police_score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThiefState {
    pub round: u32,
    pub thief: Color,
    /// Turns completed this round, both sides counted
    pub turns_taken: u32,
    pub dice: SmallVec<[u8; 2]>,
    pub stones_to_place: u32,
    pub thief_stones_placed: u32,
    pub thief_stones_captured: u32,
    pub round_scores: Vec<ThiefRoundScore>,
    pub totals: ColorPair<u32>,
    pub turn_deadline: Option<Timestamp>,
    pub round_end_deadline: Option<Timestamp>,
    pub round_confirmations: ColorPair<bool>,
}

impl ThiefState {
    fn new() -> Self {
        Self {
            round: 0,
            thief: Color::Black,
            turns_taken: 0,
            dice: SmallVec::new(),
            stones_to_place: 0,
            thief_stones_placed: 0,
            thief_stones_captured: 0,
            round_scores: Vec::new(),
            totals: ColorPair::default(),
            turn_deadline: None,
            round_end_deadline: None,
            round_confirmations: ColorPair::default(),
        }
    }

    pub fn role_of(&self, color: Color) -> ThiefRole {
        if color == self.thief {
            ThiefRole::Thief
        } else {
            ThiefRole::Police
        }
    }

    pub fn police(&self) -> Color {
        self.thief.opposite()
    }
}

pub struct ThiefDriver;

impl ModeDriver for ThiefDriver {
    fn initialize(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) {
        session.clock.enabled = false;
        session.extension = ModeExtension::Thief(ThiefState::new());
        seat_players(self, session, now, rng);
    }

    fn begin_play(&self, session: &mut Session, now: Timestamp, _rng: &mut dyn RngCore) {
        if let Some(state) = session.thief_mut() {
            state.round = 1;
            state.thief = Color::Black;
        }
        start_round(session, now);
    }

    fn advance(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) -> bool {
        match session.phase {
            Phase::Ended => false,
            phase if phase.is_setup() => advance_setup(self, session, now, rng),
            Phase::ThiefRolling => {
                if !session.thief().is_some_and(|s| is_past(s.turn_deadline, now)) {
                    return false;
                }
                // Idle roller: roll on their behalf
                let current = session.current_player;
                roll_dice(session, current, now, rng);
                true
            }
            Phase::ThiefPlacing => {
                if !session.thief().is_some_and(|s| is_past(s.turn_deadline, now)) {
                    return false;
                }
                // Unplaced stones are forfeited
                end_turn(session, now);
                true
            }
            Phase::ThiefRoundEnd => {
                if !session
                    .thief()
                    .is_some_and(|s| is_past(s.round_end_deadline, now))
                {
                    return false;
                }
                finish_round(session, now, rng);
                true
            }
            _ => false,
        }
    }

    fn handle(
        &self,
        session: &mut Session,
        color: Color,
        action: &GameAction,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Result<ActionResponse, ActionError> {
        match (session.phase, action) {
            (Phase::ThiefRolling, GameAction::ThiefRollDice {}) => {
                ensure_turn(session, color)?;
                Ok(roll_dice(session, color, now, rng))
            }
            (Phase::ThiefPlacing, GameAction::ThiefPlaceStone { x, y }) => {
                ensure_turn(session, color)?;
                place(session, color, Point::new(*x, *y), now)
            }
            (Phase::ThiefRoundEnd, GameAction::ConfirmRoundEnd {}) => {
                confirm_round_end(session, color, now, rng)
            }
            (
                _,
                GameAction::ThiefRollDice {}
                | GameAction::ThiefPlaceStone { .. }
                | GameAction::ConfirmRoundEnd {},
            ) => Err(ActionError::WrongPhase(session.phase)),
            _ => Err(ActionError::UnsupportedAction),
        }
    }
}

fn ensure_turn(session: &Session, color: Color) -> Result<(), ActionError> {
    if session.current_player != color {
        return Err(ActionError::NotYourTurn);
    }
    Ok(())
}

fn start_round(session: &mut Session, now: Timestamp) {
    let turn_ms = session.settings.thief_turn_ms;
    session.board.clear();
    session.forbidden_point = None;
    let Some(state) = session.thief_mut() else {
        return;
    };
    state.turns_taken = 0;
    state.dice.clear();
    state.stones_to_place = 0;
    state.thief_stones_placed = 0;
    state.thief_stones_captured = 0;
    state.round_end_deadline = None;
    state.round_confirmations = ColorPair::default();
    state.turn_deadline = Some(now + turn_ms);
    let thief = state.thief;

    session.current_player = thief;
    session.phase = Phase::ThiefRolling;
}

fn roll_dice(
    session: &mut Session,
    color: Color,
    now: Timestamp,
    rng: &mut dyn RngCore,
) -> ActionResponse {
    let turn_ms = session.settings.thief_turn_ms;
    let Some(state) = session.thief_mut() else {
        return ActionResponse::Ack;
    };
    let count = match state.role_of(color) {
        ThiefRole::Thief => THIEF_DICE,
        ThiefRole::Police => POLICE_DICE,
    };
    let dice: SmallVec<[u8; 2]> = (0..count).map(|_| rng.gen_range(1..=6)).collect();
    let budget = dice.iter().map(|d| *d as u32).sum();
    state.dice = dice.clone();
    state.stones_to_place = budget;
    state.turn_deadline = Some(now + turn_ms);
    session.phase = Phase::ThiefPlacing;
    ActionResponse::Dice {
        values: dice.to_vec(),
        stones_to_place: budget,
    }
}

/// Points `color` may place on, `None` meaning anywhere empty
pub fn allowed_points(session: &Session, color: Color) -> Option<Vec<Point>> {
    let state = session.thief()?;
    let thief = state.thief;
    let board = &session.board;

    let candidates: Vec<Point> = if color == thief {
        board
            .liberties_of(thief)
            .into_iter()
            .filter(|p| board.neighbors(*p).iter().any(|n| board.get(*n) == Some(thief)))
            .collect()
    } else {
        board.liberties_of(thief)
    };
    if candidates.is_empty() {
        None
    } else {
        Some(candidates)
    }
}

fn place(
    session: &mut Session,
    color: Color,
    point: Point,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    if !session.board.contains(point) {
        return Err(ActionError::InvalidTarget("point is outside the board"));
    }
    if let Some(allowed) = allowed_points(session, color) {
        if !allowed.contains(&point) {
            return Err(ActionError::InvalidTarget(if color == session_thief(session) {
                "thief stones must touch an existing thief stone"
            } else {
                "police stones must take a thief liberty"
            }));
        }
    }

    let placement = session.board.place(point, color, None, false)?;
    let captured = placement.captured.len() as u32;
    *session.captures.get_mut(color) += captured;
    session.record_move(color, Some(point), MoveKind::Place, now);

    let thief_left = session.board.count(session_thief(session));
    let Some(state) = session.thief_mut() else {
        return Err(ActionError::UnsupportedAction);
    };
    if color == state.thief {
        state.thief_stones_placed += 1;
    } else {
        state.thief_stones_captured += captured;
    }
    state.stones_to_place = state.stones_to_place.saturating_sub(1);
    let budget_spent = state.stones_to_place == 0;
    let thief_wiped = state.thief_stones_placed > 0 && thief_left == 0;

    if thief_wiped {
        end_round(session, now);
    } else if budget_spent {
        end_turn(session, now);
    }
    Ok(ActionResponse::Captured { count: captured })
}

fn session_thief(session: &Session) -> Color {
    session.thief().map(|s| s.thief).unwrap_or(Color::Black)
}

fn end_turn(session: &mut Session, now: Timestamp) {
    let turns_per_round = session.settings.thief_turns_per_round;
    let turn_ms = session.settings.thief_turn_ms;
    let current = session.current_player;
    let Some(state) = session.thief_mut() else {
        return;
    };
    state.turns_taken += 1;
    state.stones_to_place = 0;
    state.dice.clear();
    if state.turns_taken >= turns_per_round * 2 {
        end_round(session, now);
        return;
    }
    state.turn_deadline = Some(now + turn_ms);
    session.current_player = current.opposite();
    session.phase = Phase::ThiefRolling;
}

fn end_round(session: &mut Session, now: Timestamp) {
    let id = session.id;
    let thief = session_thief(session);
    let thief_score = session.board.count(thief) as u32;
    let Some(state) = session.thief_mut() else {
        return;
    };
    let police_score = state.thief_stones_captured;
    *state.totals.get_mut(thief) += thief_score;
    *state.totals.get_mut(thief.opposite()) += police_score;
    state.round_scores.push(ThiefRoundScore {
        round: state.round,
        thief,
        thief_score,
        police_score,
    });
    state.turn_deadline = None;
    state.round_end_deadline = Some(now + ROUND_SUMMARY_MS);
    state.round_confirmations = ColorPair::default();
    tracing::debug!(
        "Session {}: thief round {} thief={} police={}",
        id,
        state.round,
        thief_score,
        police_score
    );
    session.phase = Phase::ThiefRoundEnd;
}

fn confirm_round_end(
    session: &mut Session,
    color: Color,
    now: Timestamp,
    rng: &mut dyn RngCore,
) -> Result<ActionResponse, ActionError> {
    let Some(state) = session.thief_mut() else {
        return Err(ActionError::UnsupportedAction);
    };
    let confirmed = state.round_confirmations.get_mut(color);
    if *confirmed {
        return Err(ActionError::AlreadySubmitted);
    }
    *confirmed = true;
    let both = state.round_confirmations.black && state.round_confirmations.white;
    if both || session.category.ai_color().is_some() {
        finish_round(session, now, rng);
    }
    Ok(ActionResponse::Ack)
}

/// Two regular rounds with swapped roles, then sudden death while tied
fn finish_round(session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) {
    let Some(state) = session.thief_mut() else {
        return;
    };
    let totals = state.totals;
    let tied = totals.black == totals.white;

    if state.round < REGULAR_ROUNDS || (tied && state.round == REGULAR_ROUNDS) {
        state.round += 1;
        state.thief = state.thief.opposite();
        start_round(session, now);
        return;
    }

    let score = Some(FinalScore {
        black: totals.black as f32,
        white: totals.white as f32,
    });
    let (winner, reason) = match totals.black.cmp(&totals.white) {
        std::cmp::Ordering::Greater => (Color::Black, WinReason::ThiefScore),
        std::cmp::Ordering::Less => (Color::White, WinReason::ThiefScore),
        std::cmp::Ordering::Equal => {
            let pick = if rng.gen_bool(0.5) {
                Color::Black
            } else {
                Color::White
            };
            (pick, WinReason::RandomTiebreak)
        }
    };
    session.end_game(Some(winner), reason, score, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::modes::{apply_turn_order_event, create_session, SessionSeed};
    use crate::game::state::{GameMode, GameSettings, SessionCategory, Slot};
    use crate::game::turn_order::TurnOrderEvent;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(3)
    }

    fn settings() -> GameSettings {
        GameSettings {
            board_size: 9,
            thief_turns_per_round: 2,
            thief_turn_ms: 10_000,
            ..Default::default()
        }
    }

    /// Session past role selection with player1 as thief
    fn playing() -> Session {
        let mut r = rng();
        let mut session = create_session(
            SessionSeed {
                id: Uuid::new_v4(),
                mode: GameMode::Thief,
                settings: settings(),
                player1_id: Uuid::new_v4(),
                player2_id: Uuid::new_v4(),
                category: SessionCategory::Pvp,
                ranked: false,
                rematch_of: None,
            },
            0,
            &mut r,
        );
        assert_eq!(session.phase, Phase::TurnPreferenceSelection);

        let mut order = session.turn_order.take().unwrap();
        order
            .submit_preference(Slot::Player1, ThiefRole::Thief.as_preference(), 0)
            .unwrap();
        let event = order
            .submit_preference(Slot::Player2, ThiefRole::Police.as_preference(), 0)
            .unwrap();
        session.turn_order = Some(order);
        apply_turn_order_event(&ThiefDriver, &mut session, event, 0, &mut r);
        assert_eq!(session.phase, Phase::StartConfirmation);

        let order = session.turn_order.as_mut().unwrap();
        order.confirm_start(Slot::Player1).unwrap();
        let event = order.confirm_start(Slot::Player2).unwrap();
        assert_eq!(event, TurnOrderEvent::Started);
        apply_turn_order_event(&ThiefDriver, &mut session, event, 0, &mut r);
        session
    }

    fn act(session: &mut Session, color: Color, action: GameAction) -> Result<ActionResponse, ActionError> {
        ThiefDriver.handle(session, color, &action, 100, &mut rng())
    }

    #[test]
    fn test_thief_is_first_and_black() {
        let session = playing();
        assert_eq!(session.black_player_id, Some(session.player1_id));
        assert_eq!(session.phase, Phase::ThiefRolling);
        assert_eq!(session.current_player, Color::Black);
        assert_eq!(session.thief().unwrap().thief, Color::Black);
    }

    #[test]
    fn test_dice_counts_by_role() {
        let mut session = playing();
        let ActionResponse::Dice { values, stones_to_place } =
            act(&mut session, Color::Black, GameAction::ThiefRollDice {}).unwrap()
        else {
            panic!("expected dice response");
        };
        assert_eq!(values.len(), THIEF_DICE);
        assert!((1..=6).contains(&stones_to_place));
        assert_eq!(session.phase, Phase::ThiefPlacing);

        // Police turn
        session.thief_mut().unwrap().stones_to_place = 1;
        act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 4, y: 4 }).unwrap();
        let ActionResponse::Dice { values, .. } =
            act(&mut session, Color::White, GameAction::ThiefRollDice {}).unwrap()
        else {
            panic!("expected dice response");
        };
        assert_eq!(values.len(), POLICE_DICE);
    }

    #[test]
    fn test_thief_adjacency_constraint() {
        let mut session = playing();
        act(&mut session, Color::Black, GameAction::ThiefRollDice {}).unwrap();
        session.thief_mut().unwrap().stones_to_place = 2;

        // First thief stone may go anywhere
        act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 4, y: 4 }).unwrap();
        let before = session.clone();
        assert!(matches!(
            act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 0, y: 0 }),
            Err(ActionError::InvalidTarget(_))
        ));
        assert_eq!(session, before);
        act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 4, y: 5 }).unwrap();
    }

    #[test]
    fn test_police_must_take_liberty() {
        let mut session = playing();
        act(&mut session, Color::Black, GameAction::ThiefRollDice {}).unwrap();
        session.thief_mut().unwrap().stones_to_place = 1;
        act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 4, y: 4 }).unwrap();
        assert_eq!(session.current_player, Color::White);

        act(&mut session, Color::White, GameAction::ThiefRollDice {}).unwrap();
        assert!(act(&mut session, Color::White, GameAction::ThiefPlaceStone { x: 0, y: 0 }).is_err());
        assert!(act(&mut session, Color::White, GameAction::ThiefPlaceStone { x: 4, y: 3 }).is_ok());
    }

    #[test]
    fn test_capturing_every_thief_stone_ends_round() {
        let mut session = playing();
        act(&mut session, Color::Black, GameAction::ThiefRollDice {}).unwrap();
        session.thief_mut().unwrap().stones_to_place = 1;
        act(&mut session, Color::Black, GameAction::ThiefPlaceStone { x: 0, y: 0 }).unwrap();

        act(&mut session, Color::White, GameAction::ThiefRollDice {}).unwrap();
        session.thief_mut().unwrap().stones_to_place = 2;
        act(&mut session, Color::White, GameAction::ThiefPlaceStone { x: 1, y: 0 }).unwrap();
        act(&mut session, Color::White, GameAction::ThiefPlaceStone { x: 0, y: 1 }).unwrap();

        assert_eq!(session.phase, Phase::ThiefRoundEnd);
        let summary = session.thief().unwrap().round_scores[0];
        assert_eq!(summary.thief_score, 0);
        assert_eq!(summary.police_score, 1);
    }

    #[test]
    fn test_turn_limit_ends_round_and_roles_swap() {
        let mut session = playing();
        let mut r = rng();
        // Two turns per side, every one left to expire
        let mut now = 0;
        while session.phase != Phase::ThiefRoundEnd {
            now += 10_000;
            assert!(ThiefDriver.advance(&mut session, now, &mut r));
        }
        assert_eq!(session.thief().unwrap().turns_taken, 4);

        act(&mut session, Color::Black, GameAction::ConfirmRoundEnd {}).unwrap();
        act(&mut session, Color::White, GameAction::ConfirmRoundEnd {}).unwrap();

        let state = session.thief().unwrap();
        assert_eq!(state.round, 2);
        assert_eq!(state.thief, Color::White);
        assert_eq!(session.current_player, Color::White);
        assert!(session.board.is_empty());
    }

    #[test]
    fn test_tie_after_two_rounds_goes_to_sudden_death() {
        let mut session = playing();
        {
            let state = session.thief_mut().unwrap();
            state.round = REGULAR_ROUNDS;
            state.totals = ColorPair::new(4, 4);
        }
        finish_round(&mut session, 0, &mut rng());
        assert_eq!(session.thief().unwrap().round, REGULAR_ROUNDS + 1);
        assert!(!session.is_ended());

        session.thief_mut().unwrap().totals = ColorPair::new(4, 6);
        finish_round(&mut session, 0, &mut rng());
        let outcome = session.outcome.unwrap();
        assert_eq!(outcome.winner, Some(Color::White));
        assert_eq!(outcome.reason, WinReason::ThiefScore);
    }

    #[test]
    fn test_rolling_deadline_rolls_for_idle_player() {
        let mut session = playing();
        assert!(ThiefDriver.advance(&mut session, 10_000, &mut rng()));
        assert_eq!(session.phase, Phase::ThiefPlacing);
        assert_eq!(session.thief().unwrap().dice.len(), THIEF_DICE);
    }
}
