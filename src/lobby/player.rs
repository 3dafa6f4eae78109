use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::state::{SessionId, UserId};

/// Starting and maximum action points for a fresh record
pub const DEFAULT_ACTION_POINTS: u32 = 30;

/// Presence / availability of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    /// In the waiting room, can be challenged
    Waiting,
    Negotiating,
    InGame(SessionId),
    Spectating(SessionId),
    Offline,
}

impl UserStatus {
    pub fn is_challengeable(self) -> bool {
        self == UserStatus::Waiting
    }

    pub fn session(self) -> Option<SessionId> {
        match self {
            UserStatus::InGame(id) | UserStatus::Spectating(id) => Some(id),
            _ => None,
        }
    }
}

/// Mirror of the persisted user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub nickname: String,
    pub action_points: u32,
    pub max_action_points: u32,
    pub status: UserStatus,
}

impl UserRecord {
    pub fn new(id: UserId, nickname: String) -> Self {
        Self {
            id,
            nickname,
            action_points: DEFAULT_ACTION_POINTS,
            max_action_points: DEFAULT_ACTION_POINTS,
            status: UserStatus::Online,
        }
    }
}

/// Identity-status table plus action points
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: HashMap<UserId, UserRecord>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record (e.g. loaded from persistence)
    pub fn upsert(&mut self, record: UserRecord) {
        self.users.insert(record.id, record);
    }

    pub fn get(&self, id: UserId) -> Option<&UserRecord> {
        self.users.get(&id)
    }

    pub fn status(&self, id: UserId) -> UserStatus {
        self.users
            .get(&id)
            .map(|u| u.status)
            .unwrap_or(UserStatus::Offline)
    }

    /// Returns false for unknown identities
    pub fn set_status(&mut self, id: UserId, status: UserStatus) -> bool {
        match self.users.get_mut(&id) {
            Some(user) => {
                if user.status != status {
                    tracing::debug!("User {} status {:?} -> {:?}", id, user.status, status);
                    user.status = status;
                }
                true
            }
            None => false,
        }
    }

    pub fn has_points(&self, id: UserId, cost: u32) -> bool {
        self.users
            .get(&id)
            .is_some_and(|u| u.action_points >= cost)
    }

    /// Deduct `cost` from both identities, or from neither
    pub fn deduct_pair(&mut self, a: UserId, b: UserId, cost: u32) -> bool {
        if !self.has_points(a, cost) || !self.has_points(b, cost) {
            return false;
        }
        for id in [a, b] {
            if let Some(user) = self.users.get_mut(&id) {
                user.action_points -= cost;
            }
        }
        true
    }

    pub fn deduct(&mut self, id: UserId, cost: u32) -> bool {
        match self.users.get_mut(&id) {
            Some(user) if user.action_points >= cost => {
                user.action_points -= cost;
                true
            }
            _ => false,
        }
    }

    pub fn statuses(&self) -> HashMap<UserId, UserStatus> {
        self.users.iter().map(|(id, u)| (*id, u.status)).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
