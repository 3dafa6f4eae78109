use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{Persistence, StoreError};
use crate::game::state::{Session, SessionId, UserId};
use crate::lobby::player::UserRecord;

/// Process-local store, used when no data directory is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Persistence for MemoryStore {
    fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    fn load_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().get(&id).cloned())
    }

    fn save_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.users.write().insert(user.id, user.clone());
        Ok(())
    }
}
