//! Turn clock: main time, byoyomi overtime and per-move increment
//!
//! All deadlines are absolute timestamps evaluated lazily by `check_timeout`.
//! The clock never reads the wall clock itself.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::clock::MANUAL_PAUSE_COOLDOWN_MS;
use crate::game::state::{Color, ColorPair, GameSettings, SessionId};
use crate::util::time::Timestamp;

/// What an expired deadline resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Main time ran out; the first overtime window opened without using a period
    EnteredOvertime,
    /// An overtime window ran out; one period was used and a fresh window opened
    PeriodConsumed,
    /// No time left for this colour
    TimeLoss(Color),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameClock {
    pub enabled: bool,
    pub main_time_left_ms: ColorPair<i64>,
    pub periods_left: ColorPair<u32>,
    pub overtime_ms: i64,
    pub increment_ms: i64,
    pub turn_deadline: Option<Timestamp>,
    pub paused_turn_time_left: Option<i64>,
    pub item_use_deadline: Option<Timestamp>,
}

impl GameClock {
    pub fn from_settings(settings: &GameSettings) -> Self {
        Self {
            enabled: settings.clock_enabled(),
            main_time_left_ms: ColorPair::splat(settings.main_time_ms),
            periods_left: ColorPair::splat(settings.byoyomi_periods),
            overtime_ms: settings.byoyomi_ms,
            increment_ms: settings.increment_ms,
            turn_deadline: None,
            paused_turn_time_left: None,
            item_use_deadline: None,
        }
    }

    /// Whether `color` is playing in overtime
    pub fn in_overtime(&self, color: Color) -> bool {
        *self.main_time_left_ms.get(color) <= 0
    }

    /// Length of the next window for `color`, `None` when no time is left
    fn window_for(&self, color: Color) -> Option<i64> {
        let main = *self.main_time_left_ms.get(color);
        if main > 0 {
            Some(main)
        } else if *self.periods_left.get(color) > 0 && self.overtime_ms > 0 {
            Some(self.overtime_ms)
        } else {
            None
        }
    }

    /// Open the deadline for `color`
    pub fn start(&mut self, color: Color, now: Timestamp) {
        if !self.enabled {
            return;
        }
        self.paused_turn_time_left = None;
        self.item_use_deadline = None;
        // No time left at all: an already-expired deadline resolves on the next check
        self.turn_deadline = Some(now + self.window_for(color).unwrap_or(0));
    }

    /// Freeze the running deadline and open a grace window
    pub fn pause(&mut self, now: Timestamp, grace_ms: i64) {
        if let Some(deadline) = self.turn_deadline.take() {
            self.paused_turn_time_left = Some((deadline - now).max(0));
        }
        self.item_use_deadline = Some(now + grace_ms);
    }

    /// Restore the frozen time for `color`
    pub fn resume(&mut self, now: Timestamp, color: Color) {
        self.item_use_deadline = None;
        let Some(left) = self.paused_turn_time_left.take() else {
            return;
        };
        if left > 0 {
            self.turn_deadline = Some(now + left);
        } else {
            *self.main_time_left_ms.get_mut(color) = 0;
            self.turn_deadline = Some(now + self.window_for(color).unwrap_or(0));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.item_use_deadline.is_some()
    }

    /// Commit the mover's elapsed time and open the next colour's deadline
    pub fn on_move_completed(&mut self, mover: Color, now: Timestamp) -> Color {
        let next = mover.opposite();
        if !self.enabled {
            self.paused_turn_time_left = None;
            self.item_use_deadline = None;
            return next;
        }

        let remaining = match (self.turn_deadline.take(), self.paused_turn_time_left.take()) {
            (Some(deadline), _) => Some((deadline - now).max(0)),
            (None, Some(left)) => Some(left),
            (None, None) => None,
        };
        if let Some(remaining) = remaining {
            // Overtime windows reset each turn; only main time is carried over
            if !self.in_overtime(mover) {
                *self.main_time_left_ms.get_mut(mover) = remaining + self.increment_ms;
            }
        }

        self.start(next, now);
        next
    }

    /// Resolve an expired window for `color` whose deadline was `at`
    pub fn on_timeout(&mut self, color: Color, at: Timestamp) -> TimeoutOutcome {
        let main = self.main_time_left_ms.get_mut(color);
        if *main > 0 {
            *main = 0;
            return match self.window_for(color) {
                Some(window) => {
                    self.turn_deadline = Some(at + window);
                    TimeoutOutcome::EnteredOvertime
                }
                None => {
                    self.turn_deadline = None;
                    TimeoutOutcome::TimeLoss(color)
                }
            };
        }

        let periods = self.periods_left.get_mut(color);
        *periods = periods.saturating_sub(1);
        match self.window_for(color) {
            Some(window) => {
                self.turn_deadline = Some(at + window);
                TimeoutOutcome::PeriodConsumed
            }
            None => {
                self.turn_deadline = None;
                TimeoutOutcome::TimeLoss(color)
            }
        }
    }

    /// Replay every window that expired before `now`
    ///
    /// Returns `Some(TimeLoss)` when `current` ran out entirely, otherwise the
    /// last non-terminal transition (if any).
    pub fn check_timeout(&mut self, now: Timestamp, current: Color) -> Option<TimeoutOutcome> {
        if !self.enabled || self.item_use_deadline.is_some() {
            return None;
        }
        let mut last = None;
        while let Some(deadline) = self.turn_deadline {
            if now < deadline {
                break;
            }
            let outcome = self.on_timeout(current, deadline);
            last = Some(outcome);
            if matches!(outcome, TimeoutOutcome::TimeLoss(_)) {
                break;
            }
        }
        last
    }

    /// Remaining time of the running window
    pub fn remaining(&self, color: Color, now: Timestamp, current: Color) -> i64 {
        if color == current {
            if let Some(deadline) = self.turn_deadline {
                return (deadline - now).max(0);
            }
            if let Some(left) = self.paused_turn_time_left {
                return left;
            }
        }
        *self.main_time_left_ms.get(color)
    }

    /// Stop all deadlines (game over)
    pub fn stop(&mut self) {
        self.turn_deadline = None;
        self.paused_turn_time_left = None;
        self.item_use_deadline = None;
    }
}

/// Manual-pause cool-downs, keyed by session
///
/// An entry exists while a session is manually paused and holds the earliest
/// time it may be resumed. Entries are removed on resume.
#[derive(Debug, Default)]
pub struct PauseCooldowns {
    resumable_at: FxHashMap<SessionId, Timestamp>,
}

impl PauseCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, session: SessionId, now: Timestamp) {
        self.resumable_at
            .insert(session, now + MANUAL_PAUSE_COOLDOWN_MS);
    }

    pub fn is_paused(&self, session: SessionId) -> bool {
        self.resumable_at.contains_key(&session)
    }

    /// Clear the entry if the cool-down elapsed, else return the time still to wait
    pub fn try_resume(&mut self, session: SessionId, now: Timestamp) -> Result<(), i64> {
        match self.resumable_at.get(&session) {
            Some(&at) if now < at => Err(at - now),
            Some(_) => {
                self.resumable_at.remove(&session);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn forget(&mut self, session: SessionId) {
        self.resumable_at.remove(&session);
    }

    pub fn len(&self) -> usize {
        self.resumable_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resumable_at.is_empty()
    }
}
