//! Go-family driver: standard, capture, hidden-stone and missile play

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::game::board::Point;
use crate::game::clock::TimeoutOutcome;
use crate::game::constants::clock::ITEM_USE_GRACE_MS;
use crate::game::constants::go::{
    HIDDEN_REVEAL_ANIMATION_MS, HIDDEN_STONE_CAPTURE_VALUE, MISSILE_ANIMATION_MS,
    OBJECTIVE_STONE_CAPTURE_VALUE,
};
use crate::game::dispatch::{ActionResponse, GameAction};
use crate::game::error::ActionError;
use crate::game::modes::{advance_setup, seat_players, ModeDriver};
use crate::game::state::{
    Color, ColorPair, GameMode, ModeExtension, MoveKind, Phase, Session, WinReason,
};
use crate::util::time::{is_past, Timestamp};

/// A concealed stone and whether it has been exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenStone {
    pub point: Point,
    pub owner: Color,
    pub revealed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenState {
    pub stones: Vec<HiddenStone>,
    pub hidden_left: ColorPair<u32>,
    pub scans_left: ColorPair<u32>,
    pub reveal_ends_at: Option<Timestamp>,
}

impl HiddenState {
    fn unrevealed_at(&self, point: Point) -> Option<usize> {
        self.stones
            .iter()
            .position(|s| s.point == point && !s.revealed)
    }

    pub fn has_unrevealed(&self) -> bool {
        self.stones.iter().any(|s| !s.revealed)
    }

    /// Points a viewer of `viewer` colour may not see
    pub fn concealed_from(&self, viewer: Option<Color>) -> impl Iterator<Item = Point> + '_ {
        self.stones
            .iter()
            .filter(move |s| !s.revealed && Some(s.owner) != viewer)
            .map(|s| s.point)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissileFlight {
    pub color: Color,
    pub from: Point,
    pub to: Point,
    pub ends_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissileState {
    pub missiles_left: ColorPair<u32>,
    pub flight: Option<MissileFlight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureState {
    pub target: u32,
    /// Seeded stones worth extra when captured
    pub objectives: Vec<Point>,
}

pub struct GoDriver;

impl ModeDriver for GoDriver {
    fn initialize(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) {
        let settings = session.settings.clone();
        let extension = match session.mode {
            GameMode::Hidden => ModeExtension::Hidden(HiddenState {
                stones: Vec::new(),
                hidden_left: ColorPair::splat(settings.hidden_stone_count),
                scans_left: ColorPair::splat(settings.scan_count),
                reveal_ends_at: None,
            }),
            GameMode::Missile => ModeExtension::Missile(MissileState {
                missiles_left: ColorPair::splat(settings.missile_count),
                flight: None,
            }),
            GameMode::Capture => {
                let objectives = seed_objectives(session, settings.objective_stones, rng);
                ModeExtension::Capture(CaptureState {
                    target: settings.capture_target,
                    objectives,
                })
            }
            _ => ModeExtension::None,
        };
        session.extension = extension;
        seat_players(self, session, now, rng);
    }

    fn begin_play(&self, session: &mut Session, now: Timestamp, _rng: &mut dyn RngCore) {
        session.phase = Phase::Playing;
        session.current_player = Color::Black;
        session.clock.start(Color::Black, now);
    }

    fn advance(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) -> bool {
        match session.phase {
            Phase::Ended => false,
            phase if phase.is_setup() => advance_setup(self, session, now, rng),
            Phase::Playing => check_clock(session, now),
            Phase::Scanning => {
                if !is_past(session.clock.item_use_deadline, now) {
                    return false;
                }
                // Scan window lapsed; the scan is forfeited
                let current = session.current_player;
                session.clock.resume(now, current);
                session.phase = Phase::Playing;
                check_clock(session, now);
                true
            }
            Phase::MissileAnimating => {
                let ModeExtension::Missile(missile) = &mut session.extension else {
                    return false;
                };
                let Some(flight) = missile.flight else {
                    return false;
                };
                if now < flight.ends_at {
                    return false;
                }
                missile.flight = None;
                session.phase = Phase::Playing;
                complete_turn(session, flight.color, now);
                true
            }
            Phase::HiddenRevealAnimating => {
                let ModeExtension::Hidden(hidden) = &mut session.extension else {
                    return false;
                };
                if !is_past(hidden.reveal_ends_at, now) {
                    return false;
                }
                hidden.reveal_ends_at = None;
                session.phase = Phase::Scoring;
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
        _rng: &mut dyn RngCore,
    ) -> Result<ActionResponse, ActionError> {
        match (session.phase, action) {
            (Phase::Playing, GameAction::PlaceStone { x, y, hidden }) => {
                ensure_turn(session, color)?;
                place_stone(session, color, Point::new(*x, *y), *hidden, now)
            }
            (Phase::Playing, GameAction::PassTurn {}) => {
                ensure_turn(session, color)?;
                pass_turn(session, color, now);
                Ok(ActionResponse::Ack)
            }
            (Phase::Playing, GameAction::StartScanning {}) => {
                ensure_turn(session, color)?;
                start_scanning(session, color, now)
            }
            (Phase::Scanning, GameAction::ScanBoard { x, y }) => {
                ensure_turn(session, color)?;
                scan_board(session, color, Point::new(*x, *y), now)
            }
            (Phase::Playing, GameAction::LaunchMissile { from, direction }) => {
                ensure_turn(session, color)?;
                launch_missile(session, color, *from, *direction, now)
            }
            (
                _,
                GameAction::PlaceStone { .. }
                | GameAction::PassTurn {}
                | GameAction::StartScanning {}
                | GameAction::ScanBoard { .. }
                | GameAction::LaunchMissile { .. },
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

/// Resolve expired clock windows for the player to move
fn check_clock(session: &mut Session, now: Timestamp) -> bool {
    let current = session.current_player;
    match session.clock.check_timeout(now, current) {
        Some(TimeoutOutcome::TimeLoss(loser)) => {
            session.end_game(Some(loser.opposite()), WinReason::Timeout, None, now);
            true
        }
        Some(_) => true,
        None => false,
    }
}

fn complete_turn(session: &mut Session, mover: Color, now: Timestamp) {
    session.current_player = session.clock.on_move_completed(mover, now);
}

fn seed_objectives(session: &mut Session, per_side: u32, rng: &mut dyn RngCore) -> Vec<Point> {
    let size = session.board.size();
    let mut objectives = Vec::new();
    let mut attempts = 0;
    while objectives.len() < (per_side * 2) as usize && attempts < 200 {
        attempts += 1;
        let p = Point::new(rng.gen_range(0..size), rng.gen_range(0..size));
        let crowded = session.board.get(p).is_some()
            || session
                .board
                .neighbors(p)
                .iter()
                .any(|n| session.board.get(*n).is_some());
        if crowded {
            continue;
        }
        let color = if objectives.len() % 2 == 0 {
            Color::Black
        } else {
            Color::White
        };
        session.board.set(p, Some(color));
        objectives.push(p);
    }
    objectives
}

fn place_stone(
    session: &mut Session,
    color: Color,
    point: Point,
    hidden: bool,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    if !session.board.contains(point) {
        return Err(ActionError::InvalidTarget("point is outside the board"));
    }
    if hidden {
        match &session.extension {
            ModeExtension::Hidden(state) if *state.hidden_left.get(color) > 0 => {}
            ModeExtension::Hidden(_) => return Err(ActionError::NoUsesLeft("hidden stones")),
            _ => return Err(ActionError::UnsupportedAction),
        }
    }

    if session.board.get(point).is_some() {
        // Playing onto a concealed enemy stone exposes it; the turn stays
        if let ModeExtension::Hidden(state) = &mut session.extension {
            if let Some(idx) = state.unrevealed_at(point) {
                if state.stones[idx].owner != color {
                    state.stones[idx].revealed = true;
                    return Ok(ActionResponse::Revealed { point });
                }
            }
        }
        // Visible occupied point: accepted without effect
        return Ok(ActionResponse::Ack);
    }

    let placement = session.board.place(
        point,
        color,
        session.forbidden_point,
        session.settings.allow_suicide,
    )?;

    let mut value = 0;
    for captured in &placement.captured {
        value += capture_value(session, *captured);
    }
    *session.captures.get_mut(color) += value;

    if hidden {
        if let ModeExtension::Hidden(state) = &mut session.extension {
            *state.hidden_left.get_mut(color) -= 1;
            state.stones.push(HiddenStone {
                point,
                owner: color,
                revealed: false,
            });
        }
    }

    let kind = if hidden { MoveKind::Hidden } else { MoveKind::Place };
    session.record_move(color, Some(point), kind, now);
    session.forbidden_point = placement.forbidden_next;
    session.pass_count = 0;

    if let ModeExtension::Capture(state) = &session.extension {
        if *session.captures.get(color) >= state.target {
            session.end_game(Some(color), WinReason::CaptureGoal, None, now);
            return Ok(ActionResponse::Captured {
                count: placement.captured.len() as u32,
            });
        }
    }

    complete_turn(session, color, now);
    Ok(ActionResponse::Captured {
        count: placement.captured.len() as u32,
    })
}

/// Capture value of the stone removed at `point`
fn capture_value(session: &mut Session, point: Point) -> u32 {
    match &mut session.extension {
        ModeExtension::Hidden(state) => match state.stones.iter().position(|s| s.point == point) {
            Some(idx) => {
                let stone = state.stones.remove(idx);
                if stone.revealed {
                    1
                } else {
                    HIDDEN_STONE_CAPTURE_VALUE
                }
            }
            None => 1,
        },
        ModeExtension::Capture(state) => match state.objectives.iter().position(|p| *p == point) {
            Some(idx) => {
                state.objectives.remove(idx);
                OBJECTIVE_STONE_CAPTURE_VALUE
            }
            None => 1,
        },
        _ => 1,
    }
}

fn pass_turn(session: &mut Session, color: Color, now: Timestamp) {
    session.record_move(color, None, MoveKind::Pass, now);
    session.forbidden_point = None;
    session.pass_count += 1;

    if session.pass_count < 2 {
        complete_turn(session, color, now);
        return;
    }

    match &mut session.extension {
        ModeExtension::Hidden(state) if state.has_unrevealed() => {
            for stone in state.stones.iter_mut() {
                stone.revealed = true;
            }
            state.reveal_ends_at = Some(now + HIDDEN_REVEAL_ANIMATION_MS);
            session.clock.stop();
            session.phase = Phase::HiddenRevealAnimating;
        }
        ModeExtension::Capture(_) => {
            let black = session.captures.black;
            let white = session.captures.white;
            let winner = match black.cmp(&white) {
                std::cmp::Ordering::Greater => Some(Color::Black),
                std::cmp::Ordering::Less => Some(Color::White),
                std::cmp::Ordering::Equal => None,
            };
            session.end_game(winner, WinReason::Score, None, now);
        }
        _ => {
            session.clock.stop();
            session.phase = Phase::Scoring;
        }
    }
}

fn start_scanning(
    session: &mut Session,
    color: Color,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    let ModeExtension::Hidden(state) = &mut session.extension else {
        return Err(ActionError::UnsupportedAction);
    };
    let scans = state.scans_left.get_mut(color);
    if *scans == 0 {
        return Err(ActionError::NoUsesLeft("scans"));
    }
    *scans -= 1;
    session.clock.pause(now, ITEM_USE_GRACE_MS);
    session.phase = Phase::Scanning;
    Ok(ActionResponse::Ack)
}

fn scan_board(
    session: &mut Session,
    color: Color,
    point: Point,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    if !session.board.contains(point) {
        return Err(ActionError::InvalidTarget("point is outside the board"));
    }
    let ModeExtension::Hidden(state) = &mut session.extension else {
        return Err(ActionError::UnsupportedAction);
    };
    let found = match state.unrevealed_at(point) {
        Some(idx) if state.stones[idx].owner != color => {
            state.stones[idx].revealed = true;
            true
        }
        _ => false,
    };
    session.clock.resume(now, color);
    session.phase = Phase::Playing;
    Ok(ActionResponse::Scan { point, found })
}

fn launch_missile(
    session: &mut Session,
    color: Color,
    from: Point,
    direction: Direction,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    match &session.extension {
        ModeExtension::Missile(state) if *state.missiles_left.get(color) > 0 => {}
        ModeExtension::Missile(_) => return Err(ActionError::NoUsesLeft("missiles")),
        _ => return Err(ActionError::UnsupportedAction),
    }
    if session.board.get(from) != Some(color) {
        return Err(ActionError::InvalidTarget("missile must start from your own stone"));
    }

    let (dx, dy) = direction.delta();
    let mut to = from;
    loop {
        let (nx, ny) = (to.x as i32 + dx, to.y as i32 + dy);
        if !session.board.in_bounds(nx, ny) {
            break;
        }
        let next = Point::new(nx as u8, ny as u8);
        if session.board.get(next).is_some() {
            break;
        }
        to = next;
    }
    if to == from {
        return Err(ActionError::InvalidTarget("missile path is blocked"));
    }

    session.board.set(from, None);
    session.board.set(to, Some(color));
    let captured = session.board.remove_dead(color.opposite());
    let mut value = 0;
    for point in &captured {
        value += capture_value(session, *point);
    }
    *session.captures.get_mut(color) += value;
    let lost = session.board.remove_dead(color);
    *session.captures.get_mut(color.opposite()) += lost.len() as u32;

    if let ModeExtension::Missile(state) = &mut session.extension {
        *state.missiles_left.get_mut(color) -= 1;
        state.flight = Some(MissileFlight {
            color,
            from,
            to,
            ends_at: now + MISSILE_ANIMATION_MS,
        });
    }
    session.record_move(color, Some(to), MoveKind::Missile { from }, now);
    session.forbidden_point = None;
    session.pass_count = 0;
    session.clock.pause(now, MISSILE_ANIMATION_MS);
    session.phase = Phase::MissileAnimating;

    Ok(ActionResponse::Missile {
        to,
        captured: captured.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::modes::{create_session, SessionSeed};
    use crate::game::state::{GameSettings, SessionCategory};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn seeded(mode: GameMode, settings: GameSettings) -> Session {
        let mut rng = rng();
        create_session(
            SessionSeed {
                id: Uuid::new_v4(),
                mode,
                settings,
                player1_id: Uuid::new_v4(),
                player2_id: Uuid::new_v4(),
                category: SessionCategory::Pvp,
                ranked: false,
                rematch_of: None,
            },
            0,
            &mut rng,
        )
    }

    fn fixed() -> GameSettings {
        GameSettings {
            board_size: 9,
            player1_color: Some(Color::Black),
            ..Default::default()
        }
    }

    fn timed(main: i64, periods: u32, overtime: i64) -> GameSettings {
        GameSettings {
            board_size: 9,
            player1_color: Some(Color::Black),
            main_time_ms: main,
            byoyomi_periods: periods,
            byoyomi_ms: overtime,
            ..Default::default()
        }
    }

    fn play(session: &mut Session, color: Color, action: GameAction, now: Timestamp) -> Result<ActionResponse, ActionError> {
        GoDriver.handle(session, color, &action, now, &mut rng())
    }

    fn place(x: u8, y: u8) -> GameAction {
        GameAction::PlaceStone { x, y, hidden: false }
    }

    #[test]
    fn test_two_placements_alternate() {
        let mut session = seeded(GameMode::Standard, fixed());
        assert_eq!(session.phase, Phase::Playing);
        let first = session.current_player;

        play(&mut session, first, place(2, 2), 1_000).unwrap();
        play(&mut session, first.opposite(), place(2, 3), 2_000).unwrap();

        assert_eq!(session.move_history.len(), 2);
        assert_eq!(session.current_player, first);
        assert_eq!(session.board.get(Point::new(2, 2)), Some(first));
    }

    #[test]
    fn test_out_of_turn_rejected_without_mutation() {
        let mut session = seeded(GameMode::Standard, fixed());
        let before = session.clone();

        assert_eq!(
            play(&mut session, Color::White, place(0, 0), 10),
            Err(ActionError::NotYourTurn)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_occupied_visible_point_is_noop() {
        let mut session = seeded(GameMode::Standard, fixed());
        play(&mut session, Color::Black, place(4, 4), 10).unwrap();

        let before = session.clone();
        assert_eq!(
            play(&mut session, Color::White, place(4, 4), 20),
            Ok(ActionResponse::Ack)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_two_passes_enter_scoring() {
        let mut session = seeded(GameMode::Standard, fixed());
        play(&mut session, Color::Black, GameAction::PassTurn {}, 10).unwrap();
        assert_eq!(session.phase, Phase::Playing);
        play(&mut session, Color::White, GameAction::PassTurn {}, 20).unwrap();
        assert_eq!(session.phase, Phase::Scoring);
    }

    #[test]
    fn test_clock_invariant_through_play() {
        let mut session = seeded(GameMode::Standard, timed(60_000, 3, 10_000));
        assert!(session.clock_invariant_holds());

        play(&mut session, Color::Black, place(3, 3), 5_000).unwrap();
        assert!(session.clock_invariant_holds());
        play(&mut session, Color::White, place(5, 5), 9_000).unwrap();
        assert!(session.clock_invariant_holds());
        assert_eq!(session.clock.main_time_left_ms.black, 55_000);
    }

    #[test]
    fn test_timeout_loss_via_advance() {
        let mut session = seeded(GameMode::Standard, timed(10_000, 0, 0));
        let mut r = rng();

        assert!(!GoDriver.advance(&mut session, 9_999, &mut r));
        assert!(GoDriver.advance(&mut session, 10_000, &mut r));

        let outcome = session.outcome.unwrap();
        assert_eq!(outcome.winner, Some(Color::White));
        assert_eq!(outcome.reason, WinReason::Timeout);
    }

    #[test]
    fn test_overtime_entry_does_not_end_game() {
        let mut session = seeded(GameMode::Standard, timed(10_000, 1, 5_000));
        let mut r = rng();

        assert!(GoDriver.advance(&mut session, 10_000, &mut r));
        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.clock.periods_left.black, 1);
        assert!(session.clock_invariant_holds());
    }

    #[test]
    fn test_capture_mode_goal() {
        let mut settings = fixed();
        settings.capture_target = 1;
        let mut session = seeded(GameMode::Capture, settings);

        play(&mut session, Color::Black, place(1, 0), 1).unwrap();
        play(&mut session, Color::White, place(0, 0), 2).unwrap();
        play(&mut session, Color::Black, place(0, 1), 3).unwrap();

        let outcome = session.outcome.unwrap();
        assert_eq!(outcome.winner, Some(Color::Black));
        assert_eq!(outcome.reason, WinReason::CaptureGoal);
    }

    #[test]
    fn test_capture_mode_two_passes_tie_is_draw() {
        let mut session = seeded(GameMode::Capture, fixed());
        play(&mut session, Color::Black, GameAction::PassTurn {}, 1).unwrap();
        play(&mut session, Color::White, GameAction::PassTurn {}, 2).unwrap();

        let outcome = session.outcome.unwrap();
        assert_eq!(outcome.winner, None);
    }

    #[test]
    fn test_objective_stones_seeded() {
        let mut settings = fixed();
        settings.objective_stones = 2;
        let session = seeded(GameMode::Capture, settings);

        let ModeExtension::Capture(state) = &session.extension else {
            panic!("expected capture state");
        };
        assert_eq!(state.objectives.len(), 4);
        assert_eq!(session.board.count(Color::Black), 2);
        assert_eq!(session.board.count(Color::White), 2);
    }

    #[test]
    fn test_hidden_stone_capture_bonus() {
        let mut session = seeded(GameMode::Hidden, fixed());

        play(&mut session, Color::Black, place(1, 0), 1).unwrap();
        play(
            &mut session,
            Color::White,
            GameAction::PlaceStone { x: 0, y: 0, hidden: true },
            2,
        )
        .unwrap();
        play(&mut session, Color::Black, place(0, 1), 3).unwrap();

        assert_eq!(session.captures.black, HIDDEN_STONE_CAPTURE_VALUE);
    }

    #[test]
    fn test_hidden_stone_revealed_by_placement_keeps_turn() {
        let mut session = seeded(GameMode::Hidden, fixed());
        play(
            &mut session,
            Color::Black,
            GameAction::PlaceStone { x: 4, y: 4, hidden: true },
            1,
        )
        .unwrap();

        let response = play(&mut session, Color::White, place(4, 4), 2).unwrap();
        assert_eq!(response, ActionResponse::Revealed { point: Point::new(4, 4) });
        assert_eq!(session.current_player, Color::White);

        let ModeExtension::Hidden(state) = &session.extension else {
            panic!("expected hidden state");
        };
        assert!(state.stones[0].revealed);
    }

    #[test]
    fn test_hidden_stone_budget() {
        let mut settings = fixed();
        settings.hidden_stone_count = 0;
        let mut session = seeded(GameMode::Hidden, settings);

        assert_eq!(
            play(
                &mut session,
                Color::Black,
                GameAction::PlaceStone { x: 4, y: 4, hidden: true },
                1
            ),
            Err(ActionError::NoUsesLeft("hidden stones"))
        );
    }

    #[test]
    fn test_scan_pauses_and_resumes_clock() {
        let mut settings = timed(60_000, 0, 0);
        settings.hidden_stone_count = 1;
        settings.scan_count = 1;
        let mut session = seeded(GameMode::Hidden, settings);

        play(
            &mut session,
            Color::Black,
            GameAction::PlaceStone { x: 2, y: 2, hidden: true },
            1_000,
        )
        .unwrap();
        play(&mut session, Color::White, GameAction::StartScanning {}, 3_000).unwrap();
        assert_eq!(session.phase, Phase::Scanning);
        assert!(session.clock.turn_deadline.is_none());
        assert!(session.clock_invariant_holds());

        let response = play(&mut session, Color::White, GameAction::ScanBoard { x: 2, y: 2 }, 20_000).unwrap();
        assert_eq!(response, ActionResponse::Scan { point: Point::new(2, 2), found: true });
        assert_eq!(session.phase, Phase::Playing);
        // 2 s used before scanning, 58 s restored
        assert_eq!(session.clock.turn_deadline, Some(78_000));
        assert!(session.clock_invariant_holds());
    }

    #[test]
    fn test_scan_window_lapse_resumes() {
        let mut settings = timed(60_000, 0, 0);
        settings.scan_count = 1;
        let mut session = seeded(GameMode::Hidden, settings);

        play(&mut session, Color::Black, GameAction::StartScanning {}, 0).unwrap();
        assert!(GoDriver.advance(&mut session, ITEM_USE_GRACE_MS, &mut rng()));
        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.current_player, Color::Black);
    }

    #[test]
    fn test_hidden_two_passes_force_reveal_then_scoring() {
        let mut session = seeded(GameMode::Hidden, fixed());
        play(
            &mut session,
            Color::Black,
            GameAction::PlaceStone { x: 4, y: 4, hidden: true },
            1,
        )
        .unwrap();
        play(&mut session, Color::White, GameAction::PassTurn {}, 2).unwrap();
        play(&mut session, Color::Black, GameAction::PassTurn {}, 3).unwrap();
        assert_eq!(session.phase, Phase::HiddenRevealAnimating);

        let mut r = rng();
        assert!(!GoDriver.advance(&mut session, 3 + HIDDEN_REVEAL_ANIMATION_MS - 1, &mut r));
        assert!(GoDriver.advance(&mut session, 3 + HIDDEN_REVEAL_ANIMATION_MS, &mut r));
        assert_eq!(session.phase, Phase::Scoring);
    }

    #[test]
    fn test_missile_slides_until_blocked() {
        let mut session = seeded(GameMode::Missile, fixed());
        play(&mut session, Color::Black, place(0, 4), 1).unwrap();
        play(&mut session, Color::White, place(6, 4), 2).unwrap();

        let response = play(
            &mut session,
            Color::Black,
            GameAction::LaunchMissile {
                from: Point::new(0, 4),
                direction: Direction::Right,
            },
            3,
        )
        .unwrap();
        assert_eq!(
            response,
            ActionResponse::Missile {
                to: Point::new(5, 4),
                captured: 0
            }
        );
        assert_eq!(session.phase, Phase::MissileAnimating);
        assert_eq!(session.board.get(Point::new(0, 4)), None);

        let mut r = rng();
        assert!(GoDriver.advance(&mut session, 3 + MISSILE_ANIMATION_MS, &mut r));
        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.current_player, Color::White);
    }

    #[test]
    fn test_missile_blocked_rejected() {
        let mut session = seeded(GameMode::Missile, fixed());
        play(&mut session, Color::Black, place(0, 0), 1).unwrap();
        play(&mut session, Color::White, place(8, 8), 2).unwrap();

        let before = session.clone();
        assert!(play(
            &mut session,
            Color::Black,
            GameAction::LaunchMissile {
                from: Point::new(0, 0),
                direction: Direction::Up,
            },
            3,
        )
        .is_err());
        assert_eq!(session, before);
    }

    #[test]
    fn test_missile_keeps_clock_paused_while_flying() {
        let mut session = seeded(GameMode::Missile, timed(60_000, 0, 0));
        play(&mut session, Color::Black, place(0, 4), 0).unwrap();
        play(&mut session, Color::White, place(8, 8), 0).unwrap();
        play(
            &mut session,
            Color::Black,
            GameAction::LaunchMissile {
                from: Point::new(0, 4),
                direction: Direction::Right,
            },
            1_000,
        )
        .unwrap();

        assert!(session.clock_invariant_holds());
        assert!(session.clock.turn_deadline.is_none());
    }

    #[test]
    fn test_setup_phase_rejects_moves() {
        let settings = GameSettings {
            board_size: 9,
            ..Default::default()
        };
        let mut session = seeded(GameMode::Standard, settings);
        assert_eq!(session.phase, Phase::TurnPreferenceSelection);
        assert_eq!(
            play(&mut session, Color::Black, place(0, 0), 1),
            Err(ActionError::WrongPhase(Phase::TurnPreferenceSelection))
        );
    }
}
