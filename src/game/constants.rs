/// Negotiation (challenge/accept) constants
pub mod negotiation {
    /// Time either side has to act on a negotiation before it lapses
    pub const RESPONSE_WINDOW_MS: i64 = 60_000;
    /// Settings round-trips allowed before the negotiation is force-failed
    pub const MAX_TURN_COUNT: u32 = 10;
    /// Action-point cost of a strategic (Go family) match
    pub const STRATEGIC_ACTION_POINT_COST: u32 = 2;
    /// Action-point cost of a playful (curling, dice) match
    pub const PLAYFUL_ACTION_POINT_COST: u32 = 3;
}

/// Turn-order protocol constants
pub mod turn_order {
    /// Window for submitting first/second preference
    pub const PREFERENCE_WINDOW_MS: i64 = 30_000;
    /// Window for each rock-paper-scissors round
    pub const DRAW_WINDOW_MS: i64 = 30_000;
    /// Rounds before a tie is broken by a uniform random pick
    pub const MAX_DRAW_ROUNDS: u8 = 3;
    /// Window for both sides to acknowledge the start
    pub const START_CONFIRMATION_MS: i64 = 30_000;
}

/// Clock constants
pub mod clock {
    /// Grace window while a player resolves a special action (scan, missile)
    pub const ITEM_USE_GRACE_MS: i64 = 30_000;
    /// Minimum time a manually paused AI game stays paused
    pub const MANUAL_PAUSE_COOLDOWN_MS: i64 = 5_000;
}

/// Go-family constants
pub mod go {
    /// Capture value of a concealed stone
    pub const HIDDEN_STONE_CAPTURE_VALUE: u32 = 5;
    /// Capture value of an objective stone in capture mode
    pub const OBJECTIVE_STONE_CAPTURE_VALUE: u32 = 5;
    /// Duration of the forced reveal animation before scoring
    pub const HIDDEN_REVEAL_ANIMATION_MS: i64 = 3_000;
    /// Duration of a missile flight animation
    pub const MISSILE_ANIMATION_MS: i64 = 1_500;
    /// Standard komi applied by the built-in analyzer
    pub const DEFAULT_KOMI: f32 = 6.5;
}

/// Curling constants
pub mod curling {
    /// Board cell size in pixels
    pub const CELL_SIZE_PX: f64 = 40.0;
    /// Disc radius as a fraction of a cell
    pub const DISC_RADIUS_CELLS: f64 = 0.45;
    /// Velocity multiplier applied every tick
    pub const FRICTION: f64 = 0.98;
    /// Velocity multiplier while the slide item is active
    pub const SLIDE_FRICTION: f64 = 0.99;
    /// Speeds below this are snapped to zero
    pub const STOP_EPSILON: f64 = 0.01;
    /// Hard ceiling on simulation ticks per throw
    pub const MAX_TICKS: u32 = 1000;
    /// Simulated tick length used to size the animation window
    pub const TICK_MS: i64 = 16;
    /// Settle delay after discs stop moving
    pub const SETTLE_DELAY_MS: i64 = 2_000;
    /// Round summary display time
    pub const ROUND_SUMMARY_MS: i64 = 20_000;
    /// Maximum launch speed in pixels per tick
    pub const MAX_LAUNCH_SPEED: f64 = 60.0;
    /// Mass multiplier of a disc thrown with the heavy item
    pub const HEAVY_MASS: f64 = 2.0;
    /// Score awarded per opposing disc knocked off the board
    pub const KNOCKOUT_SCORE: u32 = 1;
    /// Distance bands (in cells) and their scores, innermost first
    pub const SCORE_BANDS: [(f64, u32); 4] = [(0.5, 5), (2.0, 3), (4.0, 2), (6.0, 1)];
}

/// Thief/police dice constants
pub mod thief {
    /// Dice rolled by the thief each turn
    pub const THIEF_DICE: usize = 1;
    /// Dice rolled by the police each turn
    pub const POLICE_DICE: usize = 2;
    /// Regular rounds before a sudden-death round is considered
    pub const REGULAR_ROUNDS: u32 = 2;
    /// Round summary display time
    pub const ROUND_SUMMARY_MS: i64 = 20_000;
}

/// Shared session constants
pub mod session {
    /// Minimum spacing between two manner gestures from the same player
    pub const GESTURE_COOLDOWN_MS: i64 = 10_000;
    /// Ended sessions are dropped from memory after this long
    pub const ENDED_RETENTION_MS: i64 = 10 * 60_000;
}

/// Network-related constants
pub mod net {
    /// Maximum framed message size
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Default heartbeat sweep interval
    pub const SWEEP_INTERVAL_MS: u64 = 1_000;
}
