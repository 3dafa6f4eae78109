//! Action dispatcher
//!
//! Resolves the acting seat, tries the shared actions (resign, pause/resume,
//! turn order, gestures) and then hands everything else to the mode driver.
//! A command either succeeds with a response or fails without touching the
//! session.

use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::game::board::Point;
use crate::game::clock::PauseCooldowns;
use crate::game::constants::clock::MANUAL_PAUSE_COOLDOWN_MS;
use crate::game::constants::session::GESTURE_COOLDOWN_MS;
use crate::game::error::ActionError;
use crate::game::modes::curling::CurlingItem;
use crate::game::modes::go::Direction;
use crate::game::modes::thief::ThiefRole;
use crate::game::modes::{apply_turn_order_event, driver_for};
use crate::game::state::{Color, GameMode, Gesture, Phase, Session, Slot, UserId, WinReason};
use crate::game::turn_order::{RpsChoice, TurnPreference};
use crate::util::time::Timestamp;
use crate::util::vec2::Vec2;

/// In-game command, keyed by its wire tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameAction {
    ChooseTurnPreference {
        preference: TurnPreference,
    },
    ChooseThiefRole {
        role: ThiefRole,
    },
    SubmitRpsChoice {
        choice: RpsChoice,
    },
    ConfirmStart {},
    PlaceStone {
        x: u8,
        y: u8,
        #[serde(default)]
        hidden: bool,
    },
    PassTurn {},
    ResignGame {},
    StartScanning {},
    ScanBoard {
        x: u8,
        y: u8,
    },
    LaunchMissile {
        from: Point,
        direction: Direction,
    },
    CurlingFlickStone {
        x: f64,
        velocity: Vec2,
    },
    UseCurlingItem {
        item: CurlingItem,
    },
    ConfirmRoundEnd {},
    ThiefRollDice {},
    ThiefPlaceStone {
        x: u8,
        y: u8,
    },
    PauseAiGame {},
    ResumeAiGame {},
    ActionButton {
        gesture: String,
    },
}

impl GameAction {
    /// Wire tag, used for logging and metrics
    pub fn tag(&self) -> &'static str {
        match self {
            GameAction::ChooseTurnPreference { .. } => "CHOOSE_TURN_PREFERENCE",
            GameAction::ChooseThiefRole { .. } => "CHOOSE_THIEF_ROLE",
            GameAction::SubmitRpsChoice { .. } => "SUBMIT_RPS_CHOICE",
            GameAction::ConfirmStart {} => "CONFIRM_START",
            GameAction::PlaceStone { .. } => "PLACE_STONE",
            GameAction::PassTurn {} => "PASS_TURN",
            GameAction::ResignGame {} => "RESIGN_GAME",
            GameAction::StartScanning {} => "START_SCANNING",
            GameAction::ScanBoard { .. } => "SCAN_BOARD",
            GameAction::LaunchMissile { .. } => "LAUNCH_MISSILE",
            GameAction::CurlingFlickStone { .. } => "CURLING_FLICK_STONE",
            GameAction::UseCurlingItem { .. } => "USE_CURLING_ITEM",
            GameAction::ConfirmRoundEnd {} => "CONFIRM_ROUND_END",
            GameAction::ThiefRollDice {} => "THIEF_ROLL_DICE",
            GameAction::ThiefPlaceStone { .. } => "THIEF_PLACE_STONE",
            GameAction::PauseAiGame {} => "PAUSE_AI_GAME",
            GameAction::ResumeAiGame {} => "RESUME_AI_GAME",
            GameAction::ActionButton { .. } => "ACTION_BUTTON",
        }
    }
}

/// Successful command result, sent back as `clientResponse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResponse {
    Ack,
    Captured { count: u32 },
    Revealed { point: Point },
    Scan { point: Point, found: bool },
    Missile { to: Point, captured: u32 },
    Throw { ticks: u32, knocked_off: u32 },
    Dice { values: Vec<u8>, stones_to_place: u32 },
    Paused { resumable_at: Timestamp },
}

/// Per-call collaborators of the dispatcher
pub struct DispatchContext<'a> {
    pub now: Timestamp,
    pub rng: &'a mut dyn RngCore,
    pub cooldowns: &'a Mutex<PauseCooldowns>,
}

/// Run `action` from `user` against `session`
pub fn dispatch(
    session: &mut Session,
    user: UserId,
    action: &GameAction,
    ctx: &mut DispatchContext<'_>,
) -> Result<ActionResponse, ActionError> {
    if session.is_ended() {
        return Err(ActionError::GameEnded);
    }
    let slot = session.slot_of(user).ok_or(ActionError::NotAParticipant)?;

    let response = match handle_shared(session, slot, action, ctx)? {
        Some(response) => response,
        None => {
            if ctx.cooldowns.lock().is_paused(session.id) {
                return Err(ActionError::Paused);
            }
            let color = session
                .color_of(user)
                .ok_or(ActionError::WrongPhase(session.phase))?;
            driver_for(session.mode).handle(session, color, action, ctx.now, &mut *ctx.rng)?
        }
    };

    session.touch(ctx.now);
    tracing::debug!(
        "Session {}: {} by {:?} -> phase {:?}",
        session.id,
        action.tag(),
        slot,
        session.phase
    );
    Ok(response)
}

/// Actions every mode shares; `None` means "not a shared action"
fn handle_shared(
    session: &mut Session,
    slot: Slot,
    action: &GameAction,
    ctx: &mut DispatchContext<'_>,
) -> Result<Option<ActionResponse>, ActionError> {
    let now = ctx.now;
    let response = match action {
        GameAction::ResignGame {} => {
            resign(session, slot, now);
            ctx.cooldowns.lock().forget(session.id);
            ActionResponse::Ack
        }
        GameAction::ChooseTurnPreference { preference } => {
            submit_preference(session, slot, *preference, ctx)?
        }
        GameAction::ChooseThiefRole { role } => {
            if session.mode != GameMode::Thief {
                return Err(ActionError::UnsupportedAction);
            }
            submit_preference(session, slot, role.as_preference(), ctx)?
        }
        GameAction::SubmitRpsChoice { choice } => {
            let order = session
                .turn_order
                .as_mut()
                .ok_or(ActionError::WrongPhase(session.phase))?;
            let event = order.submit_draw(slot, *choice, now, &mut *ctx.rng)?;
            apply_turn_order_event(driver_for(session.mode), session, event, now, &mut *ctx.rng);
            ActionResponse::Ack
        }
        GameAction::ConfirmStart {} => {
            let order = session
                .turn_order
                .as_mut()
                .ok_or(ActionError::WrongPhase(session.phase))?;
            let event = order.confirm_start(slot)?;
            apply_turn_order_event(driver_for(session.mode), session, event, now, &mut *ctx.rng);
            ActionResponse::Ack
        }
        GameAction::PauseAiGame {} => pause_ai_game(session, ctx)?,
        GameAction::ResumeAiGame {} => resume_ai_game(session, ctx)?,
        GameAction::ActionButton { gesture } => {
            let color = session
                .color_of(session.user_in_slot(slot))
                .ok_or(ActionError::WrongPhase(session.phase))?;
            send_gesture(session, color, gesture, now)?
        }
        _ => return Ok(None),
    };
    Ok(Some(response))
}

fn submit_preference(
    session: &mut Session,
    slot: Slot,
    preference: TurnPreference,
    ctx: &mut DispatchContext<'_>,
) -> Result<ActionResponse, ActionError> {
    let order = session
        .turn_order
        .as_mut()
        .ok_or(ActionError::WrongPhase(session.phase))?;
    let event = order.submit_preference(slot, preference, ctx.now)?;
    apply_turn_order_event(driver_for(session.mode), session, event, ctx.now, &mut *ctx.rng);
    Ok(ActionResponse::Ack)
}

/// The opponent wins; against the AI the AI side wins
fn resign(session: &mut Session, slot: Slot, now: Timestamp) {
    if !session.colors_assigned() {
        // Resigned before colours were settled: the other seat takes black
        session.assign_first(slot.other());
    }
    let winner = match session.category.ai_color() {
        Some(ai_color) => ai_color,
        None => {
            let resigner = session.user_in_slot(slot);
            session
                .color_of(resigner)
                .map(Color::opposite)
                .unwrap_or(Color::Black)
        }
    };
    session.end_game(Some(winner), WinReason::Resign, None, now);
}

fn pause_ai_game(
    session: &mut Session,
    ctx: &mut DispatchContext<'_>,
) -> Result<ActionResponse, ActionError> {
    if session.category.ai_color().is_none() {
        return Err(ActionError::NotAiGame);
    }
    if session.phase != Phase::Playing || !session.mode.is_go_family() {
        return Err(ActionError::WrongPhase(session.phase));
    }
    let mut cooldowns = ctx.cooldowns.lock();
    if cooldowns.is_paused(session.id) {
        return Err(ActionError::AlreadyPaused);
    }
    cooldowns.begin(session.id, ctx.now);
    session.clock.pause(ctx.now, MANUAL_PAUSE_COOLDOWN_MS);
    Ok(ActionResponse::Paused {
        resumable_at: ctx.now + MANUAL_PAUSE_COOLDOWN_MS,
    })
}

fn resume_ai_game(
    session: &mut Session,
    ctx: &mut DispatchContext<'_>,
) -> Result<ActionResponse, ActionError> {
    if session.category.ai_color().is_none() {
        return Err(ActionError::NotAiGame);
    }
    let mut cooldowns = ctx.cooldowns.lock();
    if !cooldowns.is_paused(session.id) {
        return Err(ActionError::NotPaused);
    }
    cooldowns
        .try_resume(session.id, ctx.now)
        .map_err(ActionError::Cooldown)?;
    let current = session.current_player;
    session.clock.resume(ctx.now, current);
    Ok(ActionResponse::Ack)
}

fn send_gesture(
    session: &mut Session,
    color: Color,
    gesture: &str,
    now: Timestamp,
) -> Result<ActionResponse, ActionError> {
    if gesture.is_empty() || gesture.len() > 32 {
        return Err(ActionError::InvalidTarget("unknown gesture"));
    }
    if let Some(last) = session.last_gesture_at.get(color) {
        let wait = last + GESTURE_COOLDOWN_MS - now;
        if wait > 0 {
            return Err(ActionError::Cooldown(wait));
        }
    }
    *session.last_gesture_at.get_mut(color) = Some(now);
    session.last_gesture = Some(Gesture {
        color,
        gesture: gesture.to_string(),
        at: now,
    });
    Ok(ActionResponse::Ack)
}
