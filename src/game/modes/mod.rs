//! Mode phase drivers
//!
//! Every mode implements [`ModeDriver`]. Drivers own their mode's extension
//! data and phases; the turn-order setup phases are shared and handled here.

pub mod curling;
pub mod go;
pub mod thief;

use rand::RngCore;

use crate::game::dispatch::{ActionResponse, GameAction};
use crate::game::error::ActionError;
use crate::game::state::{
    Color, GameMode, GameSettings, Session, SessionCategory, SessionId, Slot, UserId,
};
use crate::game::turn_order::{TurnOrderEvent, TurnOrderState};
use crate::util::time::Timestamp;

pub use curling::CurlingDriver;
pub use go::GoDriver;
pub use thief::ThiefDriver;

pub trait ModeDriver: Send + Sync {
    /// Build the mode extension and enter the first phase
    fn initialize(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore);

    /// Colours are settled; enter the first play phase
    fn begin_play(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore);

    /// Resolve expired deadlines. Returns true if the session changed.
    fn advance(&self, session: &mut Session, now: Timestamp, rng: &mut dyn RngCore) -> bool;

    /// Handle a mode action from a seated player
    fn handle(
        &self,
        session: &mut Session,
        color: Color,
        action: &GameAction,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Result<ActionResponse, ActionError>;
}

pub fn driver_for(mode: GameMode) -> &'static dyn ModeDriver {
    match mode {
        GameMode::Standard | GameMode::Capture | GameMode::Hidden | GameMode::Missile => &GoDriver,
        GameMode::Curling => &CurlingDriver,
        GameMode::Thief => &ThiefDriver,
    }
}

/// Everything needed to create a session
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub id: SessionId,
    pub mode: GameMode,
    pub settings: GameSettings,
    pub player1_id: UserId,
    pub player2_id: UserId,
    pub category: SessionCategory,
    pub ranked: bool,
    pub rematch_of: Option<SessionId>,
}

/// Create a session and run its mode initializer
pub fn create_session(seed: SessionSeed, now: Timestamp, rng: &mut dyn RngCore) -> Session {
    let mut session = Session::new(
        seed.id,
        seed.mode,
        seed.settings,
        seed.player1_id,
        seed.player2_id,
        seed.category,
        now,
    );
    session.ranked = seed.ranked;
    session.rematch_of = seed.rematch_of;
    driver_for(seed.mode).initialize(&mut session, now, rng);
    tracing::info!(
        "Session {} created: mode={:?} category={:?} phase={:?}",
        session.id,
        session.mode,
        session.category,
        session.phase
    );
    session
}

/// Seat players: fixed colours skip the turn-order draw
pub fn seat_players(
    driver: &dyn ModeDriver,
    session: &mut Session,
    now: Timestamp,
    rng: &mut dyn RngCore,
) {
    let fixed_first = match session.category.ai_color() {
        // The AI always sits in the second seat
        Some(ai_color) => Some(if ai_color == Color::Black {
            Slot::Player2
        } else {
            Slot::Player1
        }),
        None => session.settings.player1_color.map(|c| {
            if c == Color::Black {
                Slot::Player1
            } else {
                Slot::Player2
            }
        }),
    };
    let confirm = session.mode.needs_start_confirmation() && session.category == SessionCategory::Pvp;

    match fixed_first {
        Some(first) => {
            session.assign_first(first);
            if confirm {
                let order = TurnOrderState::confirmation_only(first, now);
                session.phase = order.phase();
                session.turn_order = Some(order);
            } else {
                driver.begin_play(session, now, rng);
            }
        }
        None => {
            let order = TurnOrderState::new(now, confirm);
            session.phase = order.phase();
            session.turn_order = Some(order);
        }
    }
}

/// Apply the effect of a turn-order step to the session
pub fn apply_turn_order_event(
    driver: &dyn ModeDriver,
    session: &mut Session,
    event: TurnOrderEvent,
    now: Timestamp,
    rng: &mut dyn RngCore,
) {
    if let TurnOrderEvent::FirstDecided(first) = event {
        session.assign_first(first);
    }
    let Some(order) = session.turn_order.as_ref() else {
        return;
    };
    if order.is_complete() {
        driver.begin_play(session, now, rng);
    } else {
        session.phase = order.phase();
    }
}

/// Shared `advance` for the setup phases
pub fn advance_setup(
    driver: &dyn ModeDriver,
    session: &mut Session,
    now: Timestamp,
    rng: &mut dyn RngCore,
) -> bool {
    let Some(order) = session.turn_order.as_mut() else {
        return false;
    };
    let before = order.clone();
    let event = order.advance(now, rng);
    if *order == before {
        return false;
    }
    apply_turn_order_event(driver, session, event, now, rng);
    true
}
