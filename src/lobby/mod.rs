//! Pre-game negotiation and presence
//!
//! Challenges, counter-proposals and rematches between two identities. An
//! accepted negotiation becomes a session and is discarded.

pub mod manager;
pub mod negotiation;
pub mod player;

pub use manager::{AcceptOutcome, DeclineOutcome, NegotiationManager, NegotiationSnapshot};
pub use negotiation::{Negotiation, NegotiationError, NegotiationId, NegotiationStatus};
pub use player::{UserRecord, UserRegistry, UserStatus};
