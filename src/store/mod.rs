//! Persistence collaborator
//!
//! The in-memory session is authoritative; stores are a lagging mirror
//! written through [`WriteBehind`] off the response path.

pub mod file;
pub mod memory;
pub mod write_behind;

use crate::game::state::{Session, SessionId, UserId};
use crate::lobby::player::UserRecord;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use write_behind::WriteBehind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Load/save of session and user records
pub trait Persistence: Send + Sync {
    fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    fn load_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
    fn save_user(&self, user: &UserRecord) -> Result<(), StoreError>;
}
