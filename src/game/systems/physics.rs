use serde::{Deserialize, Serialize};

use crate::game::constants::curling::{
    CELL_SIZE_PX, FRICTION, MAX_TICKS, SCORE_BANDS, STOP_EPSILON,
};
use crate::game::state::{Color, ColorPair};
use crate::util::vec2::Vec2;

/// Curling disc in board pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disc {
    pub id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f64,
    pub mass: f64,
    /// Per-tick velocity multiplier
    pub friction: f64,
    pub owner: Color,
    pub on_board: bool,
}

impl Disc {
    pub fn new(id: u32, owner: Color, position: Vec2, radius: f64) -> Self {
        Self {
            id,
            position,
            velocity: Vec2::ZERO,
            radius,
            mass: 1.0,
            friction: FRICTION,
            owner,
            on_board: true,
        }
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.on_board && !self.velocity.is_stopped()
    }
}

/// Side effect observed during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEvent {
    KnockedOff { disc_id: u32, owner: Color },
    Collision { a: u32, b: u32 },
}

/// Outcome of running a throw to rest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationResult {
    pub ticks: u32,
    pub events: Vec<PhysicsEvent>,
}

impl SimulationResult {
    pub fn knocked_off(&self) -> impl Iterator<Item = (u32, Color)> + '_ {
        self.events.iter().filter_map(|e| match e {
            PhysicsEvent::KnockedOff { disc_id, owner } => Some((*disc_id, *owner)),
            _ => None,
        })
    }
}

/// Advance every on-board disc by one tick
///
/// Order: integrate, friction, epsilon snap, boundary, pairwise collisions,
/// boundary again for discs pushed out by separation.
/// Returns true while any disc is still moving.
pub fn step(discs: &mut [Disc], board_px: f64, events: &mut Vec<PhysicsEvent>) -> bool {
    for disc in discs.iter_mut().filter(|d| d.on_board) {
        disc.position += disc.velocity;
        disc.velocity *= disc.friction;
        if disc.velocity.length() < STOP_EPSILON {
            disc.velocity = Vec2::ZERO;
        }
    }
    mark_off_board(discs, board_px, events);

    for i in 0..discs.len() {
        for j in (i + 1)..discs.len() {
            if !discs[i].on_board || !discs[j].on_board {
                continue;
            }
            let (left, right) = discs.split_at_mut(j);
            if resolve_pair(&mut left[i], &mut right[0]) {
                events.push(PhysicsEvent::Collision {
                    a: left[i].id,
                    b: right[0].id,
                });
            }
        }
    }
    mark_off_board(discs, board_px, events);

    discs.iter().any(Disc::is_moving)
}

fn mark_off_board(discs: &mut [Disc], board_px: f64, events: &mut Vec<PhysicsEvent>) {
    for disc in discs.iter_mut().filter(|d| d.on_board) {
        let p = disc.position;
        if p.x < 0.0 || p.y < 0.0 || p.x > board_px || p.y > board_px {
            disc.on_board = false;
            disc.velocity = Vec2::ZERO;
            events.push(PhysicsEvent::KnockedOff {
                disc_id: disc.id,
                owner: disc.owner,
            });
        }
    }
}

/// Elastic impulse along the contact normal plus half-overlap separation
fn resolve_pair(a: &mut Disc, b: &mut Disc) -> bool {
    let delta = b.position - a.position;
    let min_dist = a.radius + b.radius;
    if delta.length_sq() >= min_dist * min_dist {
        return false;
    }

    let (normal, dist) = delta.normalize_with_length();
    let normal = if dist > 0.0 { normal } else { Vec2::new(1.0, 0.0) };

    let closing = (b.velocity - a.velocity).dot(normal);
    if closing < 0.0 {
        let impulse = -2.0 * closing / (1.0 / a.mass + 1.0 / b.mass);
        a.velocity -= normal * (impulse / a.mass);
        b.velocity += normal * (impulse / b.mass);
    }

    let half_overlap = (min_dist - dist) / 2.0;
    a.position -= normal * half_overlap;
    b.position += normal * half_overlap;
    true
}

/// Run ticks until everything stops or the tick ceiling is reached
pub fn simulate(discs: &mut [Disc], board_px: f64) -> SimulationResult {
    let mut result = SimulationResult::default();
    while result.ticks < MAX_TICKS {
        result.ticks += 1;
        if !step(discs, board_px, &mut result.events) {
            break;
        }
    }
    // Ceiling reached: freeze whatever still drifts
    for disc in discs.iter_mut() {
        disc.velocity = Vec2::ZERO;
    }
    result
}

/// Points for a disc at `distance_cells` from the centre
pub fn band_score(distance_cells: f64) -> u32 {
    SCORE_BANDS
        .iter()
        .find(|(limit, _)| distance_cells <= *limit)
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

/// Sum of band scores of on-board discs, per owner
pub fn house_scores(discs: &[Disc], board_px: f64) -> ColorPair<u32> {
    let center = Vec2::new(board_px / 2.0, board_px / 2.0);
    let mut scores = ColorPair::default();
    for disc in discs.iter().filter(|d| d.on_board) {
        let distance_cells = disc.position.distance_to(center) / CELL_SIZE_PX;
        *scores.get_mut(disc.owner) += band_score(distance_cells);
    }
    scores
}
