//! Computer opponent for AI and tower sessions
//!
//! Move quality is not a goal here: the built-in opponent picks uniformly
//! among plausible actions. The engine retries a bounded number of times
//! when a pick turns out to be illegal.

use rand::RngCore;

use crate::game::dispatch::GameAction;
use crate::game::state::Session;

/// Picks the next action for the AI seat
pub trait AiOpponent: Send + Sync {
    /// `None` when the AI has nothing to do in the current phase
    fn choose_action(&self, session: &Session, rng: &mut dyn RngCore) -> Option<GameAction>;

    /// Fallback when repeated picks were rejected
    fn fallback(&self, session: &Session) -> Option<GameAction> {
        if session.mode.is_go_family() {
            Some(GameAction::PassTurn {})
        } else {
            None
        }
    }
}

#[cfg(feature = "ai_opponent")]
pub use random::RandomAi;

#[cfg(feature = "ai_opponent")]
mod random {
    use rand::seq::SliceRandom;
    use rand::{Rng, RngCore};

    use super::AiOpponent;
    use crate::game::board::Point;
    use crate::game::constants::curling::{CELL_SIZE_PX, MAX_LAUNCH_SPEED};
    use crate::game::dispatch::GameAction;
    use crate::game::modes::curling::board_px;
    use crate::game::modes::thief::allowed_points;
    use crate::game::state::{Color, GameMode, Phase, Session};
    use crate::util::vec2::Vec2;

    /// Passes once the board is this full
    const PASS_FILL_RATIO: f64 = 0.6;

    /// Uniform random opponent
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RandomAi;

    impl AiOpponent for RandomAi {
        fn choose_action(&self, session: &Session, rng: &mut dyn RngCore) -> Option<GameAction> {
            let color = session.current_player;
            match (session.mode, session.phase) {
                (GameMode::Curling, Phase::Playing) => Some(curling_throw(session, color, rng)),
                (GameMode::Thief, Phase::ThiefRolling) => Some(GameAction::ThiefRollDice {}),
                (GameMode::Thief, Phase::ThiefPlacing) => {
                    let point = match allowed_points(session, color) {
                        Some(points) => *points.choose(rng)?,
                        None => *empty_points(session).choose(rng)?,
                    };
                    Some(GameAction::ThiefPlaceStone {
                        x: point.x,
                        y: point.y,
                    })
                }
                (mode, Phase::Playing) if mode.is_go_family() => {
                    let empty = empty_points(session);
                    let size = session.board.size() as usize;
                    let total = size * size;
                    let filled = 1.0 - empty.len() as f64 / total as f64;
                    if empty.is_empty() || filled >= PASS_FILL_RATIO {
                        return Some(GameAction::PassTurn {});
                    }
                    let point = *empty.choose(rng)?;
                    Some(GameAction::PlaceStone {
                        x: point.x,
                        y: point.y,
                        hidden: false,
                    })
                }
                _ => None,
            }
        }
    }

    fn empty_points(session: &Session) -> Vec<Point> {
        let size = session.board.size();
        let mut out = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let p = Point::new(x, y);
                if session.board.get(p).is_none() && session.forbidden_point != Some(p) {
                    out.push(p);
                }
            }
        }
        out
    }

    /// Aim roughly at the centre with some spread
    fn curling_throw(session: &Session, color: Color, rng: &mut dyn RngCore) -> GameAction {
        let px = board_px(session);
        let x = px / 2.0 + rng.gen_range(-1.0..1.0) * CELL_SIZE_PX;
        let dir = match color {
            Color::Black => -1.0,
            Color::White => 1.0,
        };
        let speed = rng.gen_range(0.35..0.55) * MAX_LAUNCH_SPEED;
        let drift = rng.gen_range(-0.05..0.05) * speed;
        GameAction::CurlingFlickStone {
            x,
            velocity: Vec2::new(drift, dir * speed),
        }
    }

}
