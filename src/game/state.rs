//! Session state definitions
//!
//! A `Session` is the base record every mode shares; mode-specific data lives
//! in `ModeExtension` and is only touched by that mode's driver.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::game::board::{Board, Point};
use crate::game::clock::GameClock;
use crate::game::modes::curling::CurlingState;
use crate::game::modes::go::{CaptureState, HiddenState, MissileState};
use crate::game::modes::thief::ThiefState;
use crate::game::turn_order::TurnOrderState;
use crate::util::time::Timestamp;

/// Unique user identifier
pub type UserId = Uuid;

/// Unique session identifier
pub type SessionId = Uuid;

/// Identity used for the computer side of AI and tower sessions
pub const AI_USER_ID: UserId = Uuid::nil();

/// Stone / side colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    pub const BOTH: [Color; 2] = [Color::Black, Color::White];
}

/// A value held once per colour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPair<T> {
    pub black: T,
    pub white: T,
}

impl<T> ColorPair<T> {
    pub fn new(black: T, white: T) -> Self {
        Self { black, white }
    }

    pub fn get(&self, color: Color) -> &T {
        match color {
            Color::Black => &self.black,
            Color::White => &self.white,
        }
    }

    pub fn get_mut(&mut self, color: Color) -> &mut T {
        match color {
            Color::Black => &mut self.black,
            Color::White => &mut self.white,
        }
    }
}

impl<T: Clone> ColorPair<T> {
    pub fn splat(value: T) -> Self {
        Self {
            black: value.clone(),
            white: value,
        }
    }
}

/// Seat of a participant before colours are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The challenger
    Player1,
    /// The challenged opponent
    Player2,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }

    pub const BOTH: [Slot; 2] = [Slot::Player1, Slot::Player2];
}

/// A value held once per seat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPair<T> {
    pub player1: T,
    pub player2: T,
}

impl<T> SlotPair<T> {
    pub fn get(&self, slot: Slot) -> &T {
        match slot {
            Slot::Player1 => &self.player1,
            Slot::Player2 => &self.player2,
        }
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut T {
        match slot {
            Slot::Player1 => &mut self.player1,
            Slot::Player2 => &mut self.player2,
        }
    }
}

/// Game mode, fixed at session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Standard,
    Capture,
    Hidden,
    Missile,
    Curling,
    Thief,
}

/// Cost bucket a mode belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeCategory {
    Strategic,
    Playful,
}

impl GameMode {
    pub fn category(self) -> ModeCategory {
        match self {
            GameMode::Standard | GameMode::Capture | GameMode::Hidden | GameMode::Missile => {
                ModeCategory::Strategic
            }
            GameMode::Curling | GameMode::Thief => ModeCategory::Playful,
        }
    }

    pub fn is_go_family(self) -> bool {
        self.category() == ModeCategory::Strategic
    }

    /// Discrete-round modes ask both sides to acknowledge the start
    pub fn needs_start_confirmation(self) -> bool {
        matches!(self, GameMode::Curling | GameMode::Thief)
    }
}

/// Who the session is played against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    /// Two human players
    Pvp,
    /// Human against the built-in opponent
    Ai { ai_color: Color },
    /// Single-player tower floor
    Tower { floor: u32, ai_color: Color },
}

impl SessionCategory {
    pub fn ai_color(&self) -> Option<Color> {
        match self {
            SessionCategory::Pvp => None,
            SessionCategory::Ai { ai_color } | SessionCategory::Tower { ai_color, .. } => {
                Some(*ai_color)
            }
        }
    }
}

/// Match settings negotiated before the session exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSettings {
    pub board_size: u8,
    /// Main time per side, 0 disables the clock
    pub main_time_ms: i64,
    pub byoyomi_periods: u32,
    pub byoyomi_ms: i64,
    /// Fischer increment added after each move made in main time
    pub increment_ms: i64,
    /// Challenger's colour, `None` to run the turn-order protocol
    pub player1_color: Option<Color>,
    pub komi: f32,
    pub allow_suicide: bool,
    /// Captures needed to win capture mode
    pub capture_target: u32,
    /// Objective stones seeded per side in capture mode
    pub objective_stones: u32,
    pub hidden_stone_count: u32,
    pub scan_count: u32,
    pub missile_count: u32,
    pub curling_stones_per_round: u32,
    pub curling_rounds: u32,
    pub curling_turn_ms: i64,
    pub curling_foul_limit: u32,
    pub curling_item_uses: u32,
    pub thief_turns_per_round: u32,
    pub thief_turn_ms: i64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            board_size: 19,
            main_time_ms: 0,
            byoyomi_periods: 0,
            byoyomi_ms: 0,
            increment_ms: 0,
            player1_color: None,
            komi: crate::game::constants::go::DEFAULT_KOMI,
            allow_suicide: false,
            capture_target: 20,
            objective_stones: 0,
            hidden_stone_count: 2,
            scan_count: 2,
            missile_count: 2,
            curling_stones_per_round: 5,
            curling_rounds: 3,
            curling_turn_ms: 30_000,
            curling_foul_limit: 3,
            curling_item_uses: 1,
            thief_turns_per_round: 10,
            thief_turn_ms: 30_000,
        }
    }
}

impl GameSettings {
    /// Validate settings for the given mode
    pub fn validate(&self, mode: GameMode) -> Result<(), String> {
        if !(5..=19).contains(&self.board_size) {
            return Err(format!("board size {} out of range 5-19", self.board_size));
        }
        if self.main_time_ms < 0 || self.byoyomi_ms < 0 || self.increment_ms < 0 {
            return Err("time settings cannot be negative".to_string());
        }
        if self.byoyomi_periods > 0 && self.byoyomi_ms == 0 {
            return Err("byoyomi periods need a period length".to_string());
        }
        match mode {
            GameMode::Capture if self.capture_target == 0 => {
                Err("capture target must be at least 1".to_string())
            }
            GameMode::Curling if self.curling_stones_per_round == 0 || self.curling_rounds == 0 => {
                Err("curling needs at least one stone and one round".to_string())
            }
            GameMode::Curling if self.curling_turn_ms <= 0 => {
                Err("curling turn time must be positive".to_string())
            }
            GameMode::Thief if self.thief_turns_per_round == 0 || self.thief_turn_ms <= 0 => {
                Err("thief mode needs turns and a turn time".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Whether the main/byoyomi clock runs for this session
    pub fn clock_enabled(&self) -> bool {
        self.main_time_ms > 0 || (self.byoyomi_periods > 0 && self.byoyomi_ms > 0)
    }
}

/// Mode-specific status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TurnPreferenceSelection,
    RockPaperScissors,
    StartConfirmation,
    Playing,
    Scanning,
    MissileAnimating,
    HiddenRevealAnimating,
    Scoring,
    CurlingAnimating,
    CurlingRoundEnd,
    ThiefRolling,
    ThiefPlacing,
    ThiefRoundEnd,
    Ended,
}

impl Phase {
    /// Phases in which the turn clock must be running or paused
    pub fn is_active_play(self) -> bool {
        matches!(
            self,
            Phase::Playing | Phase::Scanning | Phase::MissileAnimating
        )
    }

    /// Phases owned by the turn-order protocol
    pub fn is_setup(self) -> bool {
        matches!(
            self,
            Phase::TurnPreferenceSelection | Phase::RockPaperScissors | Phase::StartConfirmation
        )
    }
}

/// What kind of entry a history record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Place,
    Hidden,
    Pass,
    Missile { from: Point },
}

/// One entry of the move history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub color: Color,
    /// Target point, `None` for passes
    pub point: Option<Point>,
    pub kind: MoveKind,
    pub at: Timestamp,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    Resign,
    Timeout,
    FoulLimit,
    Score,
    CaptureGoal,
    CurlingScore,
    ThiefScore,
    RandomTiebreak,
}

/// Final score pair reported by scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub black: f32,
    pub white: f32,
}

/// Terminal result of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// `None` for a draw
    pub winner: Option<Color>,
    pub reason: WinReason,
    pub score: Option<FinalScore>,
    pub ended_at: Timestamp,
}

/// Mode-specific payload of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModeExtension {
    None,
    Capture(CaptureState),
    Hidden(HiddenState),
    Missile(MissileState),
    Curling(CurlingState),
    Thief(ThiefState),
}

/// Last manner gesture, shown to both players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gesture {
    pub color: Color,
    pub gesture: String,
    pub at: Timestamp,
}

/// One live match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
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
    pub board: Board,
    pub clock: GameClock,
    pub move_history: Vec<MoveRecord>,
    pub captures: ColorPair<u32>,
    pub pass_count: u32,
    /// Point the next mover may not play (immediate recapture guard)
    pub forbidden_point: Option<Point>,
    pub turn_order: Option<TurnOrderState>,
    pub extension: ModeExtension,
    pub outcome: Option<GameOutcome>,
    pub spectators: HashSet<UserId>,
    pub rematch_of: Option<SessionId>,
    pub ranked: bool,
    pub last_gesture_at: ColorPair<Option<Timestamp>>,
    pub last_gesture: Option<Gesture>,
    pub revision: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Session {
    /// Bare session; the mode driver's `initialize` fills in the rest
    pub fn new(
        id: SessionId,
        mode: GameMode,
        settings: GameSettings,
        player1_id: UserId,
        player2_id: UserId,
        category: SessionCategory,
        now: Timestamp,
    ) -> Self {
        let board = Board::new(settings.board_size);
        let clock = GameClock::from_settings(&settings);
        Self {
            id,
            mode,
            category,
            settings,
            phase: Phase::TurnPreferenceSelection,
            player1_id,
            player2_id,
            black_player_id: None,
            white_player_id: None,
            current_player: Color::Black,
            board,
            clock,
            move_history: Vec::new(),
            captures: ColorPair::default(),
            pass_count: 0,
            forbidden_point: None,
            turn_order: None,
            extension: ModeExtension::None,
            outcome: None,
            spectators: HashSet::new(),
            rematch_of: None,
            ranked: false,
            last_gesture_at: ColorPair::default(),
            last_gesture: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Record a mutation
    pub fn touch(&mut self, now: Timestamp) {
        self.revision += 1;
        self.updated_at = now;
    }

    pub fn slot_of(&self, user: UserId) -> Option<Slot> {
        if user == self.player1_id {
            Some(Slot::Player1)
        } else if user == self.player2_id {
            Some(Slot::Player2)
        } else {
            None
        }
    }

    pub fn user_in_slot(&self, slot: Slot) -> UserId {
        match slot {
            Slot::Player1 => self.player1_id,
            Slot::Player2 => self.player2_id,
        }
    }

    /// Colour a user plays, `None` for spectators or before assignment
    pub fn color_of(&self, user: UserId) -> Option<Color> {
        if self.black_player_id == Some(user) {
            Some(Color::Black)
        } else if self.white_player_id == Some(user) {
            Some(Color::White)
        } else {
            None
        }
    }

    pub fn user_for(&self, color: Color) -> Option<UserId> {
        match color {
            Color::Black => self.black_player_id,
            Color::White => self.white_player_id,
        }
    }

    pub fn slot_for(&self, color: Color) -> Option<Slot> {
        self.user_for(color).and_then(|u| self.slot_of(u))
    }

    pub fn colors_assigned(&self) -> bool {
        self.black_player_id.is_some() && self.white_player_id.is_some()
    }

    /// Give black to the seat that moves first
    pub fn assign_first(&mut self, first: Slot) {
        self.black_player_id = Some(self.user_in_slot(first));
        self.white_player_id = Some(self.user_in_slot(first.other()));
        self.current_player = Color::Black;
    }

    /// Human participants (AI identity excluded)
    pub fn participants(&self) -> SmallVec<[UserId; 2]> {
        [self.player1_id, self.player2_id]
            .into_iter()
            .filter(|id| *id != AI_USER_ID)
            .collect()
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.player1_id == user || self.player2_id == user
    }

    pub fn is_ai_turn(&self) -> bool {
        self.category.ai_color() == Some(self.current_player)
    }

    /// Finish the session; clocks stop and nothing else may fire
    pub fn end_game(
        &mut self,
        winner: Option<Color>,
        reason: WinReason,
        score: Option<FinalScore>,
        now: Timestamp,
    ) {
        if self.is_ended() {
            return;
        }
        self.clock.stop();
        self.phase = Phase::Ended;
        self.outcome = Some(GameOutcome {
            winner,
            reason,
            score,
            ended_at: now,
        });
        tracing::info!(
            "Session {} ({:?}) ended: winner={:?} reason={:?}",
            self.id,
            self.mode,
            winner,
            reason
        );
    }

    /// Add a history record and reset the forbidden point unless re-set by the caller
    pub fn record_move(&mut self, color: Color, point: Option<Point>, kind: MoveKind, at: Timestamp) {
        self.move_history.push(MoveRecord {
            color,
            point,
            kind,
            at,
        });
    }

    /// Clock-invariant check used by tests and debug assertions
    pub fn clock_invariant_holds(&self) -> bool {
        if !self.clock.enabled || !self.phase.is_active_play() {
            return true;
        }
        self.clock.turn_deadline.is_some() != self.clock.paused_turn_time_left.is_some()
    }

    pub fn curling(&self) -> Option<&CurlingState> {
        match &self.extension {
            ModeExtension::Curling(state) => Some(state),
            _ => None,
        }
    }

    pub fn curling_mut(&mut self) -> Option<&mut CurlingState> {
        match &mut self.extension {
            ModeExtension::Curling(state) => Some(state),
            _ => None,
        }
    }

    pub fn thief(&self) -> Option<&ThiefState> {
        match &self.extension {
            ModeExtension::Thief(state) => Some(state),
            _ => None,
        }
    }

    pub fn thief_mut(&mut self) -> Option<&mut ThiefState> {
        match &mut self.extension {
            ModeExtension::Thief(state) => Some(state),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_session(mode: GameMode) -> Session {
        Session::new(
            Uuid::new_v4(),
            mode,
            GameSettings::default(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            SessionCategory::Pvp,
            1_000,
        )
    }

    #[test]
    fn test_color_opposite() {
        assert_eq!(Color::Black.opposite(), Color::White);
        assert_eq!(Color::White.opposite(), Color::Black);
    }

    #[test]
    fn test_color_pair_access() {
        let mut pair = ColorPair::splat(0u32);
        *pair.get_mut(Color::White) += 3;
        assert_eq!(*pair.get(Color::White), 3);
        assert_eq!(*pair.get(Color::Black), 0);
    }

    #[test]
    fn test_mode_categories() {
        assert_eq!(GameMode::Standard.category(), ModeCategory::Strategic);
        assert_eq!(GameMode::Hidden.category(), ModeCategory::Strategic);
        assert_eq!(GameMode::Curling.category(), ModeCategory::Playful);
        assert!(GameMode::Thief.needs_start_confirmation());
        assert!(!GameMode::Missile.needs_start_confirmation());
    }

    #[test]
    fn test_assign_first() {
        let mut session = create_session(GameMode::Standard);
        session.assign_first(Slot::Player2);

        assert_eq!(session.black_player_id, Some(session.player2_id));
        assert_eq!(session.white_player_id, Some(session.player1_id));
        assert_eq!(session.color_of(session.player2_id), Some(Color::Black));
        assert_eq!(session.slot_for(Color::White), Some(Slot::Player1));
    }

    #[test]
    fn test_spectator_has_no_color() {
        let mut session = create_session(GameMode::Standard);
        session.assign_first(Slot::Player1);
        assert_eq!(session.color_of(Uuid::new_v4()), None);
    }

    #[test]
    fn test_end_game_is_idempotent() {
        let mut session = create_session(GameMode::Standard);
        session.end_game(Some(Color::Black), WinReason::Resign, None, 5_000);
        session.end_game(Some(Color::White), WinReason::Timeout, None, 6_000);

        let outcome = session.outcome.unwrap();
        assert_eq!(outcome.winner, Some(Color::Black));
        assert_eq!(outcome.reason, WinReason::Resign);
        assert!(session.is_ended());
    }

    #[test]
    fn test_participants_exclude_ai() {
        let session = Session::new(
            Uuid::new_v4(),
            GameMode::Standard,
            GameSettings::default(),
            Uuid::new_v4(),
            AI_USER_ID,
            SessionCategory::Ai {
                ai_color: Color::White,
            },
            0,
        );
        assert_eq!(session.participants().len(), 1);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = GameSettings::default();
        assert!(settings.validate(GameMode::Standard).is_ok());

        settings.board_size = 25;
        assert!(settings.validate(GameMode::Standard).is_err());

        let mut settings = GameSettings::default();
        settings.capture_target = 0;
        assert!(settings.validate(GameMode::Capture).is_err());
        assert!(settings.validate(GameMode::Standard).is_ok());
    }

    #[test]
    fn test_clock_enabled() {
        let mut settings = GameSettings::default();
        assert!(!settings.clock_enabled());
        settings.byoyomi_periods = 3;
        settings.byoyomi_ms = 30_000;
        assert!(settings.clock_enabled());
    }
}
