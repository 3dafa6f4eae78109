//! Curling driver
//!
//! Phases: `start_confirmation -> playing -> curling_animating ->
//! curling_round_end -> (next round | ended)`. Throws are simulated to rest
//! immediately; the animation window only delays the turn switch.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::game::constants::curling::{
    CELL_SIZE_PX, DISC_RADIUS_CELLS, HEAVY_MASS, KNOCKOUT_SCORE, MAX_LAUNCH_SPEED,
    ROUND_SUMMARY_MS, SETTLE_DELAY_MS, SLIDE_FRICTION, TICK_MS,
};
use crate::game::dispatch::{ActionResponse, GameAction};
use crate::game::error::ActionError;
use crate::game::modes::{advance_setup, seat_players, ModeDriver};
use crate::game::state::{Color, ColorPair, FinalScore, ModeExtension, Phase, Session, WinReason};
use crate::game::systems::physics::{self, Disc};
use crate::util::time::{is_past, Timestamp};
use crate::util::vec2::Vec2;

/// Single-use throw modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurlingItem {
    /// Lower friction for the next disc
    Slide,
    /// Double mass for the next disc
    Heavy,
}

/// Starting state of the last throw, for client replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowReplay {
    pub color: Color,
    pub disc_id: u32,
    pub launch_position: Vec2,
    pub launch_velocity: Vec2,
    pub item: Option<CurlingItem>,
    pub discs_before: Vec<Disc>,
    pub ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurlingRoundScore {
    pub house: ColorPair<u32>,
    pub knockouts: ColorPair<u32>,
    pub total: ColorPair<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurlingState {
    pub discs: Vec<Disc>,
    pub next_disc_id: u32,
    pub round: u32,
    pub total_rounds: u32,
    pub round_starter: Color,
    pub stones_left: ColorPair<u32>,
    pub knockouts: ColorPair<u32>,
    pub round_scores: Vec<CurlingRoundScore>,
    pub cumulative: ColorPair<u32>,
    pub fouls: ColorPair<u32>,
    pub item_uses_left: ColorPair<u32>,
    pub active_item: Option<CurlingItem>,
    pub turn_deadline: Option<Timestamp>,
    pub animation_ends_at: Option<Timestamp>,
    pub round_end_deadline: Option<Timestamp>,
    pub round_confirmations: ColorPair<bool>,
    pub last_throw: Option<ThrowReplay>,
}

impl CurlingState {
    fn new(session: &Session) -> Self {
        let s = &session.settings;
        Self {
            discs: Vec::new(),
            next_disc_id: 0,
            round: 0,
            total_rounds: s.curling_rounds,
            round_starter: Color::Black,
            stones_left: ColorPair::default(),
            knockouts: ColorPair::default(),
            round_scores: Vec::new(),
            cumulative: ColorPair::default(),
            fouls: ColorPair::default(),
            item_uses_left: ColorPair::splat(s.curling_item_uses),
            active_item: None,
            turn_deadline: None,
            animation_ends_at: None,
            round_end_deadline: None,
            round_confirmations: ColorPair::default(),
            last_throw: None,
        }
    }
}

/// Board edge length in pixels
pub fn board_px(session: &Session) -> f64 {
    session.board.size() as f64 * CELL_SIZE_PX
}

pub fn disc_radius() -> f64 {
    DISC_RADIUS_CELLS * CELL_SIZE_PX
}

/// Launch line of each side: black throws up from the bottom edge, white down from the top
fn baseline_y(color: Color, board_px: f64) -> f64 {
    match color {
        Color::Black => board_px - CELL_SIZE_PX / 2.0,
        Color::White => CELL_SIZE_PX / 2.0,
    }
}

pub struct CurlingDriver;

impl ModeDriver for CurlingDriver {
    fn initialize(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) {
        // Curling runs on per-throw deadlines, not the main clock
        session.clock.enabled = false;
        session.extension = ModeExtension::Curling(CurlingState::new(session));
        seat_players(self, session, now, rng);
    }

    fn begin_play(&self, session: &mut Session, now: Timestamp, _rng: &mut dyn RngCore) {
        if let Some(state) = session.curling_mut() {
            state.round = 1;
            state.round_starter = Color::Black;
        }
        start_round(session, now);
    }

    fn advance(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) -> bool {
        match session.phase {
            Phase::Ended => false,
            phase if phase.is_setup() => advance_setup(self, session, now, rng),
            Phase::Playing => {
                let Some(state) = session.curling_mut() else {
                    return false;
                };
                if !is_past(state.turn_deadline, now) {
                    return false;
                }
                commit_foul(session, now);
                true
            }
            Phase::CurlingAnimating => {
                let due = session
                    .curling()
                    .is_some_and(|s| is_past(s.animation_ends_at, now));
                if !due {
                    return false;
                }
                next_turn(session, now);
                true
            }
            Phase::CurlingRoundEnd => {
                let due = session
                    .curling()
                    .is_some_and(|s| is_past(s.round_end_deadline, now));
                if !due {
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
            (Phase::Playing, GameAction::CurlingFlickStone { x, velocity }) => {
                ensure_turn(session, color)?;
                flick(session, color, *x, *velocity, now)
            }
            (Phase::Playing, GameAction::UseCurlingItem { item }) => {
                ensure_turn(session, color)?;
                use_item(session, color, *item)
            }
            (Phase::CurlingRoundEnd, GameAction::ConfirmRoundEnd {}) => {
                confirm_round_end(session, color, now, rng)
            }
            (
                _,
                GameAction::CurlingFlickStone { .. }
                | GameAction::UseCurlingItem { .. }
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
    let per_round = session.settings.curling_stones_per_round;
    let turn_ms = session.settings.curling_turn_ms;
    let Some(state) = session.curling_mut() else {
        return;
    };
    state.discs.clear();
    state.stones_left = ColorPair::splat(per_round);
    state.knockouts = ColorPair::default();
    state.active_item = None;
    state.animation_ends_at = None;
    state.round_end_deadline = None;
    state.round_confirmations = ColorPair::default();
    state.last_throw = None;
    state.turn_deadline = Some(now + turn_ms);
    let starter = state.round_starter;

    session.current_player = starter;
    session.phase = Phase::Playing;
}

fn flick(
    session: &mut Session,
    color: Color,
    x: f64,
    velocity: Vec2,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    let px = board_px(session);
    let radius = disc_radius();
    if !x.is_finite() || x < radius || x > px - radius {
        return Err(ActionError::InvalidTarget("launch point is outside the lane"));
    }
    if !velocity.is_finite() || velocity.length() <= 0.0 {
        return Err(ActionError::InvalidTarget("launch velocity must be non-zero"));
    }
    let velocity = velocity.clamp_length(MAX_LAUNCH_SPEED);

    let Some(state) = session.curling_mut() else {
        return Err(ActionError::UnsupportedAction);
    };
    if *state.stones_left.get(color) == 0 {
        return Err(ActionError::NoUsesLeft("stones"));
    }

    let position = Vec2::new(x, baseline_y(color, px));
    let mut disc = Disc::new(state.next_disc_id, color, position, radius);
    disc.velocity = velocity;
    let item = state.active_item.take();
    match item {
        Some(CurlingItem::Slide) => disc.friction = SLIDE_FRICTION,
        Some(CurlingItem::Heavy) => disc.mass = HEAVY_MASS,
        None => {}
    }

    let discs_before = state.discs.clone();
    state.next_disc_id += 1;
    state.discs.push(disc);

    let result = physics::simulate(&mut state.discs, px);
    let knocked = result
        .knocked_off()
        .filter(|(_, owner)| *owner != color)
        .count() as u32;
    *state.knockouts.get_mut(color) += knocked * KNOCKOUT_SCORE;
    *state.stones_left.get_mut(color) -= 1;

    state.turn_deadline = None;
    state.animation_ends_at = Some(now + result.ticks as i64 * TICK_MS + SETTLE_DELAY_MS);
    state.last_throw = Some(ThrowReplay {
        color,
        disc_id: disc.id,
        launch_position: position,
        launch_velocity: velocity,
        item,
        discs_before,
        ticks: result.ticks,
    });

    session.phase = Phase::CurlingAnimating;
    Ok(ActionResponse::Throw {
        ticks: result.ticks,
        knocked_off: knocked,
    })
}

fn use_item(
    session: &mut Session,
    color: Color,
    item: CurlingItem,
) -> Result<ActionResponse, ActionError> {
    let Some(state) = session.curling_mut() else {
        return Err(ActionError::UnsupportedAction);
    };
    if state.active_item.is_some() {
        return Err(ActionError::AlreadySubmitted);
    }
    let uses = state.item_uses_left.get_mut(color);
    if *uses == 0 {
        return Err(ActionError::NoUsesLeft("items"));
    }
    *uses -= 1;
    state.active_item = Some(item);
    Ok(ActionResponse::Ack)
}

/// Missed throw deadline: the throw is forfeited and counted as a foul
fn commit_foul(session: &mut Session, now: Timestamp) {
    let id = session.id;
    let current = session.current_player;
    let limit = session.settings.curling_foul_limit;
    let Some(state) = session.curling_mut() else {
        return;
    };
    let fouls = state.fouls.get_mut(current);
    *fouls += 1;
    tracing::debug!("Session {}: {:?} foul #{}", id, current, *fouls);
    if limit > 0 && *fouls >= limit {
        session.end_game(Some(current.opposite()), WinReason::FoulLimit, None, now);
        return;
    }
    let left = state.stones_left.get_mut(current);
    *left = left.saturating_sub(1);
    state.active_item = None;
    next_turn(session, now);
}

fn next_turn(session: &mut Session, now: Timestamp) {
    let current = session.current_player;
    let turn_ms = session.settings.curling_turn_ms;
    let Some(state) = session.curling_mut() else {
        return;
    };
    state.animation_ends_at = None;

    let other = current.opposite();
    let next = if *state.stones_left.get(other) > 0 {
        other
    } else if *state.stones_left.get(current) > 0 {
        current
    } else {
        end_round(session, now);
        return;
    };
    state.turn_deadline = Some(now + turn_ms);
    session.current_player = next;
    session.phase = Phase::Playing;
}

fn end_round(session: &mut Session, now: Timestamp) {
    let id = session.id;
    let px = board_px(session);
    let Some(state) = session.curling_mut() else {
        return;
    };
    let house = physics::house_scores(&state.discs, px);
    let knockouts = state.knockouts;
    let total = ColorPair::new(house.black + knockouts.black, house.white + knockouts.white);
    state.cumulative.black += total.black;
    state.cumulative.white += total.white;
    state.round_scores.push(CurlingRoundScore {
        house,
        knockouts,
        total,
    });
    state.turn_deadline = None;
    state.round_end_deadline = Some(now + ROUND_SUMMARY_MS);
    state.round_confirmations = ColorPair::default();
    tracing::debug!(
        "Session {}: curling round {} scored black={} white={}",
        id,
        state.round,
        total.black,
        total.white
    );
    session.phase = Phase::CurlingRoundEnd;
}

fn confirm_round_end(
    session: &mut Session,
    color: Color,
    now: Timestamp,
    rng: &mut dyn RngCore,
) -> Result<ActionResponse, ActionError> {
    let Some(state) = session.curling_mut() else {
        return Err(ActionError::UnsupportedAction);
    };
    let confirmed = state.round_confirmations.get_mut(color);
    if *confirmed {
        return Err(ActionError::AlreadySubmitted);
    }
    *confirmed = true;
    let both = state.round_confirmations.black && state.round_confirmations.white;
    // AI sessions have a single human to confirm
    let ai_confirms = session.category.ai_color().is_some();
    if both || ai_confirms {
        finish_round(session, now, rng);
    }
    Ok(ActionResponse::Ack)
}

fn finish_round(session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) {
    let Some(state) = session.curling_mut() else {
        return;
    };
    if state.round < state.total_rounds {
        state.round += 1;
        state.round_starter = state.round_starter.opposite();
        start_round(session, now);
        return;
    }

    let totals = state.cumulative;
    let score = Some(FinalScore {
        black: totals.black as f32,
        white: totals.white as f32,
    });
    let (winner, reason) = match totals.black.cmp(&totals.white) {
        std::cmp::Ordering::Greater => (Color::Black, WinReason::CurlingScore),
        std::cmp::Ordering::Less => (Color::White, WinReason::CurlingScore),
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
