//! Per-viewer session views for `GAME_UPDATE`
//!
//! Concealed stones are stripped from the board, the history and the mode
//! extension for everyone but their owner. Spectators never see them.
//! Turn-order picks stay private to their seat until both seats have
//! submitted; the other side only learns that a pick exists.

use serde::Serialize;

use crate::game::board::Point;
use crate::game::state::{
    Color, ColorPair, GameMode, GameOutcome, GameSettings, Gesture, ModeExtension, MoveKind,
    MoveRecord, Phase, Session, SessionCategory, SessionId, Slot, SlotPair, UserId,
};
use crate::game::turn_order::{RpsChoice, TurnOrderStage, TurnOrderState, TurnPreference};
use crate::util::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockView {
    pub enabled: bool,
    pub remaining_ms: ColorPair<i64>,
    pub periods_left: ColorPair<u32>,
    pub turn_deadline: Option<Timestamp>,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOrderView {
    pub stage: TurnOrderStage,
    pub deadline: Timestamp,
    pub preferences: SlotPair<Option<TurnPreference>>,
    pub preference_submitted: SlotPair<bool>,
    pub draw_choices: SlotPair<Option<RpsChoice>>,
    pub draw_submitted: SlotPair<bool>,
    pub draw_round: u8,
    pub draw_history: Vec<(RpsChoice, RpsChoice)>,
    pub draw_winner: Option<Slot>,
    pub first: Option<Slot>,
    pub confirmations: SlotPair<bool>,
}

impl TurnOrderView {
    /// `seat` is the viewer's seat; `None` for spectators
    pub fn for_seat(order: &TurnOrderState, seat: Option<Slot>) -> Self {
        let preferences_settled = order.stage != TurnOrderStage::Preference;
        Self {
            stage: order.stage,
            deadline: order.deadline,
            preferences: reveal(&order.preferences, seat, preferences_settled),
            preference_submitted: submitted(&order.preferences),
            // A resolved round moves into the history and clears these
            draw_choices: reveal(&order.draw_choices, seat, false),
            draw_submitted: submitted(&order.draw_choices),
            draw_round: order.draw_round,
            draw_history: order.draw_history.clone(),
            draw_winner: order.draw_winner,
            first: order.first,
            confirmations: order.confirmations,
        }
    }
}

fn reveal<T: Copy>(
    pair: &SlotPair<Option<T>>,
    seat: Option<Slot>,
    everyone: bool,
) -> SlotPair<Option<T>> {
    let show = |slot: Slot| {
        if everyone || seat == Some(slot) {
            *pair.get(slot)
        } else {
            None
        }
    };
    SlotPair {
        player1: show(Slot::Player1),
        player2: show(Slot::Player2),
    }
}

fn submitted<T>(pair: &SlotPair<Option<T>>) -> SlotPair<bool> {
    SlotPair {
        player1: pair.player1.is_some(),
        player2: pair.player2.is_some(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub mode: GameMode,
    pub category: SessionCategory,
    pub settings: GameSettings,
    pub phase: Phase,
    pub player1_id: UserId,
    pub player2_id: UserId,
    pub black_player_id: Option<UserId>,
    pub white_player_id: Option<UserId>,
    pub current_player: Color,
    /// Omitted when bandwidth saving is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<Vec<Vec<Option<Color>>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_history: Option<Vec<MoveRecord>>,
    pub move_count: usize,
    pub last_move: Option<MoveRecord>,
    pub captures: ColorPair<u32>,
    pub pass_count: u32,
    pub forbidden_point: Option<Point>,
    pub clock: ClockView,
    pub turn_order: Option<TurnOrderView>,
    pub extension: ModeExtension,
    pub outcome: Option<GameOutcome>,
    pub spectator_count: usize,
    pub last_gesture: Option<Gesture>,
    pub revision: u64,
    pub server_time: Timestamp,
}

impl SessionSnapshot {
    /// View of `session` for `viewer`; `include_board = false` drops the bulky parts
    pub fn for_viewer(
        session: &Session,
        viewer: UserId,
        include_board: bool,
        now: Timestamp,
    ) -> Self {
        let viewer_color = session.color_of(viewer);
        let concealed: Vec<Point> = match &session.extension {
            ModeExtension::Hidden(hidden) => hidden.concealed_from(viewer_color).collect(),
            _ => Vec::new(),
        };

        let board = include_board.then(|| {
            let mut rows = session.board.rows();
            for p in &concealed {
                rows[p.y as usize][p.x as usize] = None;
            }
            rows
        });
        let move_history = include_board.then(|| {
            session
                .move_history
                .iter()
                .map(|m| mask_record(m, &concealed))
                .collect()
        });
        let last_move = session
            .move_history
            .last()
            .map(|m| mask_record(m, &concealed));

        let extension = match &session.extension {
            ModeExtension::Hidden(hidden) if !concealed.is_empty() => {
                let mut hidden = hidden.clone();
                hidden.stones.retain(|s| !concealed.contains(&s.point));
                ModeExtension::Hidden(hidden)
            }
            other => other.clone(),
        };

        let current = session.current_player;
        let clock = ClockView {
            enabled: session.clock.enabled,
            remaining_ms: ColorPair::new(
                session.clock.remaining(Color::Black, now, current),
                session.clock.remaining(Color::White, now, current),
            ),
            periods_left: session.clock.periods_left,
            turn_deadline: session.clock.turn_deadline,
            paused: session.clock.is_paused(),
        };

        Self {
            id: session.id,
            mode: session.mode,
            category: session.category,
            settings: session.settings.clone(),
            phase: session.phase,
            player1_id: session.player1_id,
            player2_id: session.player2_id,
            black_player_id: session.black_player_id,
            white_player_id: session.white_player_id,
            current_player: current,
            board,
            move_history,
            move_count: session.move_history.len(),
            last_move,
            captures: session.captures,
            pass_count: session.pass_count,
            forbidden_point: session.forbidden_point,
            clock,
            turn_order: session
                .turn_order
                .as_ref()
                .map(|order| TurnOrderView::for_seat(order, session.slot_of(viewer))),
            extension,
            outcome: session.outcome.clone(),
            spectator_count: session.spectators.len(),
            last_gesture: session.last_gesture.clone(),
            revision: session.revision,
            server_time: now,
        }
    }
}

fn mask_record(record: &MoveRecord, concealed: &[Point]) -> MoveRecord {
    let mut record = record.clone();
    if record.kind == MoveKind::Hidden && record.point.is_some_and(|p| concealed.contains(&p)) {
        record.point = None;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::dispatch::{dispatch, DispatchContext, GameAction};
    use crate::game::clock::PauseCooldowns;
    use crate::game::modes::{create_session, SessionSeed};
    use crate::game::state::GameSettings;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn hidden_session() -> Session {
        session_with(GameMode::Hidden, Some(Color::Black))
    }

    fn session_with(mode: GameMode, player1_color: Option<Color>) -> Session {
        create_session(
            SessionSeed {
                id: Uuid::new_v4(),
                mode,
                settings: GameSettings {
                    board_size: 9,
                    player1_color,
                    ..Default::default()
                },
                player1_id: Uuid::new_v4(),
                player2_id: Uuid::new_v4(),
                category: SessionCategory::Pvp,
                ranked: false,
                rematch_of: None,
            },
            0,
            &mut StdRng::seed_from_u64(1),
        )
    }

    fn act(session: &mut Session, user: UserId, action: GameAction) {
        let cooldowns = Mutex::new(PauseCooldowns::new());
        let mut rng = StdRng::seed_from_u64(2);
        let mut ctx = DispatchContext {
            now: 100,
            rng: &mut rng,
            cooldowns: &cooldowns,
        };
        dispatch(session, user, &action, &mut ctx).unwrap();
    }

    fn place_hidden(session: &mut Session) {
        let black = session.player1_id;
        act(
            session,
            black,
            GameAction::PlaceStone {
                x: 4,
                y: 4,
                hidden: true,
            },
        );
    }

    fn turn_order_json(session: &Session, viewer: UserId) -> serde_json::Value {
        let snap = SessionSnapshot::for_viewer(session, viewer, false, 200);
        serde_json::to_value(&snap).unwrap()["turnOrder"].clone()
    }

    /// Both seats asked to move first, so the draw starts
    fn into_draw(session: &mut Session) {
        let (p1, p2) = (session.player1_id, session.player2_id);
        for user in [p1, p2] {
            act(
                session,
                user,
                GameAction::ChooseTurnPreference {
                    preference: TurnPreference::First,
                },
            );
        }
        assert_eq!(session.phase, Phase::RockPaperScissors);
    }

    #[test]
    fn test_hidden_stone_visible_only_to_owner() {
        let mut session = hidden_session();
        place_hidden(&mut session);
        let p = Point::new(4, 4);

        let own = SessionSnapshot::for_viewer(&session, session.player1_id, true, 200);
        assert_eq!(own.board.as_ref().unwrap()[4][4], Some(Color::Black));
        assert_eq!(own.last_move.unwrap().point, Some(p));

        let opponent = SessionSnapshot::for_viewer(&session, session.player2_id, true, 200);
        assert_eq!(opponent.board.as_ref().unwrap()[4][4], None);
        assert_eq!(opponent.last_move.unwrap().point, None);
        match opponent.extension {
            ModeExtension::Hidden(h) => assert!(h.stones.is_empty()),
            other => panic!("unexpected {other:?}"),
        }

        let spectator = SessionSnapshot::for_viewer(&session, Uuid::new_v4(), true, 200);
        assert_eq!(spectator.board.unwrap()[4][4], None);
    }

    #[test]
    fn test_bandwidth_saving_omits_board() {
        let session = hidden_session();
        let snap = SessionSnapshot::for_viewer(&session, session.player1_id, false, 0);
        assert!(snap.board.is_none());
        assert!(snap.move_history.is_none());

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("board").is_none());
        assert_eq!(json["phase"], "playing");
        assert_eq!(json["currentPlayer"], "black");
    }

    #[test]
    fn test_pending_preference_hidden_from_opponent() {
        let mut session = session_with(GameMode::Standard, None);
        let (p1, p2) = (session.player1_id, session.player2_id);
        act(
            &mut session,
            p1,
            GameAction::ChooseTurnPreference {
                preference: TurnPreference::Second,
            },
        );

        let own = turn_order_json(&session, p1);
        assert_eq!(own["preferences"]["player1"], "second");

        for viewer in [p2, Uuid::new_v4()] {
            let view = turn_order_json(&session, viewer);
            assert!(view["preferences"]["player1"].is_null());
            assert_eq!(view["preferenceSubmitted"]["player1"], true);
            assert_eq!(view["preferenceSubmitted"]["player2"], false);
        }
    }

    #[test]
    fn test_preferences_revealed_once_both_are_in() {
        let mut session = session_with(GameMode::Standard, None);
        into_draw(&mut session);

        let view = turn_order_json(&session, Uuid::new_v4());
        assert_eq!(view["preferences"]["player1"], "first");
        assert_eq!(view["preferences"]["player2"], "first");
    }

    #[test]
    fn test_pending_rps_choice_hidden_from_opponent() {
        let mut session = session_with(GameMode::Standard, None);
        into_draw(&mut session);
        let (p1, p2) = (session.player1_id, session.player2_id);
        act(
            &mut session,
            p1,
            GameAction::SubmitRpsChoice {
                choice: RpsChoice::Rock,
            },
        );

        let own = turn_order_json(&session, p1);
        assert_eq!(own["drawChoices"]["player1"], "rock");

        for viewer in [p2, Uuid::new_v4()] {
            let view = turn_order_json(&session, viewer);
            assert!(view["drawChoices"]["player1"].is_null());
            assert_eq!(view["drawSubmitted"]["player1"], true);
            assert!(!view.to_string().contains("rock"));
        }
    }

    #[test]
    fn test_resolved_round_visible_to_everyone() {
        let mut session = session_with(GameMode::Standard, None);
        into_draw(&mut session);
        let (p1, p2) = (session.player1_id, session.player2_id);
        act(
            &mut session,
            p1,
            GameAction::SubmitRpsChoice {
                choice: RpsChoice::Paper,
            },
        );
        act(
            &mut session,
            p2,
            GameAction::SubmitRpsChoice {
                choice: RpsChoice::Rock,
            },
        );

        let view = turn_order_json(&session, Uuid::new_v4());
        assert_eq!(view["drawHistory"][0][0], "paper");
        assert_eq!(view["drawHistory"][0][1], "rock");
        assert_eq!(view["drawWinner"], "player1");
        assert_eq!(view["first"], "player1");
    }

    #[test]
    fn test_start_confirmation_visible_to_opponent() {
        let mut session = session_with(GameMode::Curling, Some(Color::Black));
        assert_eq!(session.phase, Phase::StartConfirmation);
        let (p1, p2) = (session.player1_id, session.player2_id);
        act(&mut session, p1, GameAction::ConfirmStart {});

        let view = turn_order_json(&session, p2);
        assert_eq!(view["stage"], "start_confirmation");
        assert_eq!(view["confirmations"]["player1"], true);
        assert_eq!(view["confirmations"]["player2"], false);
    }
}
