//! Final scoring
//!
//! Territory counting is delegated to a [`ScoreAnalyzer`]. The built-in
//! [`StoneCountAnalyzer`] counts stones on the board plus captures and komi,
//! which is enough for tests and AI games without an external analyzer.

use crate::game::state::{Color, FinalScore, Phase, Session, WinReason};
use crate::util::time::Timestamp;

/// External final-result collaborator for Go-family sessions
pub trait ScoreAnalyzer: Send + Sync {
    fn compute_final_result(&self, session: &Session) -> FinalScore;
}

/// Area-style count: stones on board + prisoners, komi to white
#[derive(Debug, Default, Clone, Copy)]
pub struct StoneCountAnalyzer;

impl ScoreAnalyzer for StoneCountAnalyzer {
    fn compute_final_result(&self, session: &Session) -> FinalScore {
        let black = session.board.count(Color::Black) as f32 + session.captures.black as f32;
        let white = session.board.count(Color::White) as f32
            + session.captures.white as f32
            + session.settings.komi;
        FinalScore { black, white }
    }
}

/// Winner for a final score; equal points is a draw
pub fn winner_of(score: &FinalScore) -> Option<Color> {
    if score.black > score.white {
        Some(Color::Black)
    } else if score.white > score.black {
        Some(Color::White)
    } else {
        None
    }
}

/// End a session waiting in `Scoring`. Returns true if the session ended.
pub fn resolve_scoring(session: &mut Session, analyzer: &dyn ScoreAnalyzer, now: Timestamp) -> bool {
    if session.phase != Phase::Scoring {
        return false;
    }
    let score = analyzer.compute_final_result(session);
    tracing::debug!(
        "Session {} scored: black={} white={}",
        session.id,
        score.black,
        score.white
    );
    session.end_game(winner_of(&score), WinReason::Score, Some(score), now);
    true
}
