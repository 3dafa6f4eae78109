//! Broadcast fan-out
//!
//! Pushes post-mutation state to interested connections. Game updates are
//! built per viewer so concealed stones never leave the server for anyone
//! but their owner.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::game::snapshot::SessionSnapshot;
use crate::game::state::{Session, UserId, AI_USER_ID};
use crate::lobby::manager::NegotiationSnapshot;
use crate::lobby::negotiation::NegotiationId;
use crate::lobby::player::UserStatus;
use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;
use crate::util::time::Timestamp;

/// Live connections, keyed by identity
pub trait ConnectionRegistry: Send + Sync {
    /// Queue `message` for `user`. False when no connection is bound.
    fn push(&self, user: UserId, message: &ServerMessage) -> bool;

    fn connected_users(&self) -> Vec<UserId>;
}

pub struct Broadcaster {
    registry: Arc<dyn ConnectionRegistry>,
    metrics: Arc<Metrics>,
    bandwidth_saving: bool,
}

impl Broadcaster {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, metrics: Arc<Metrics>, bandwidth_saving: bool) -> Self {
        Self {
            registry,
            metrics,
            bandwidth_saving,
        }
    }

    /// `GAME_UPDATE` to both participants and every spectator
    pub fn game_update(&self, session: &Session, now: Timestamp) -> usize {
        let include_board = !self.bandwidth_saving;
        let mut delivered = 0;

        for player in session.participants() {
            if player == AI_USER_ID {
                continue;
            }
            let snapshot = SessionSnapshot::for_viewer(session, player, include_board, now);
            delivered += self.send(player, &ServerMessage::GameUpdate(Box::new(snapshot))) as usize;
        }

        // Spectators see no concealed stones, so one view serves them all
        if let Some(first) = session.spectators.iter().next() {
            let snapshot = SessionSnapshot::for_viewer(session, *first, include_board, now);
            let message = ServerMessage::GameUpdate(Box::new(snapshot));
            for spectator in &session.spectators {
                delivered += self.send(*spectator, &message) as usize;
            }
        }
        delivered
    }

    /// `NEGOTIATION_UPDATE` to every connected observer
    pub fn negotiation_update(&self, snapshot: NegotiationSnapshot) -> usize {
        let message = ServerMessage::NegotiationUpdate(snapshot);
        self.to_everyone(&message)
    }

    /// `USER_STATUS_UPDATE` to every connected observer
    pub fn user_status_update(&self, user_statuses: HashMap<UserId, UserStatus>) -> usize {
        let message = ServerMessage::UserStatusUpdate { user_statuses };
        self.to_everyone(&message)
    }

    /// `NEGOTIATION_DECLINED` to the challenger only
    pub fn negotiation_declined(
        &self,
        challenger: UserId,
        negotiation_id: NegotiationId,
        declined_by: UserId,
    ) -> bool {
        self.send(
            challenger,
            &ServerMessage::NegotiationDeclined {
                negotiation_id,
                declined_by,
            },
        )
    }

    fn to_everyone(&self, message: &ServerMessage) -> usize {
        self.registry
            .connected_users()
            .into_iter()
            .filter(|user| self.send(*user, message))
            .count()
    }

    fn send(&self, user: UserId, message: &ServerMessage) -> bool {
        let delivered = self.registry.push(user, message);
        let counter = if delivered {
            &self.metrics.pushes_sent
        } else {
            &self.metrics.push_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
        delivered
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Registry that records every push
    #[derive(Default)]
    pub struct RecordingRegistry {
        pub connected: Mutex<Vec<UserId>>,
        pub pushed: Mutex<Vec<(UserId, serde_json::Value)>>,
    }

    impl RecordingRegistry {
        pub fn with_users(users: &[UserId]) -> Self {
            Self {
                connected: Mutex::new(users.to_vec()),
                pushed: Mutex::new(Vec::new()),
            }
        }

        /// Pushes of `tag` received by `user`
        pub fn received(&self, user: UserId, tag: &str) -> Vec<serde_json::Value> {
            self.pushed
                .lock()
                .iter()
                .filter(|(to, msg)| *to == user && msg["type"] == tag)
                .map(|(_, msg)| msg["payload"].clone())
                .collect()
        }

        pub fn clear(&self) {
            self.pushed.lock().clear();
        }
    }

    impl ConnectionRegistry for RecordingRegistry {
        fn push(&self, user: UserId, message: &ServerMessage) -> bool {
            if !self.connected.lock().contains(&user) {
                return false;
            }
            let value = serde_json::to_value(message).unwrap_or_default();
            self.pushed.lock().push((user, value));
            true
        }

        fn connected_users(&self) -> Vec<UserId> {
            self.connected.lock().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRegistry;
    use super::*;
    use crate::game::state::{GameMode, GameSettings, SessionCategory};
    use uuid::Uuid;

    fn session(p1: UserId, p2: UserId) -> Session {
        Session::new(
            Uuid::new_v4(),
            GameMode::Standard,
            GameSettings::default(),
            p1,
            p2,
            SessionCategory::Pvp,
            0,
        )
    }

    #[test]
    fn test_game_update_reaches_players_and_spectators_only() {
        let (p1, p2, watcher, bystander) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let registry = Arc::new(RecordingRegistry::with_users(&[p1, p2, watcher, bystander]));
        let broadcaster = Broadcaster::new(registry.clone(), Arc::new(Metrics::new()), false);

        let mut s = session(p1, p2);
        s.spectators.insert(watcher);
        assert_eq!(broadcaster.game_update(&s, 10), 3);

        assert_eq!(registry.received(p1, "GAME_UPDATE").len(), 1);
        assert_eq!(registry.received(watcher, "GAME_UPDATE").len(), 1);
        assert!(registry.received(bystander, "GAME_UPDATE").is_empty());
    }

    #[test]
    fn test_bandwidth_saving_drops_board() {
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let registry = Arc::new(RecordingRegistry::with_users(&[p1, p2]));
        let broadcaster = Broadcaster::new(registry.clone(), Arc::new(Metrics::new()), true);

        broadcaster.game_update(&session(p1, p2), 10);
        let payload = &registry.received(p1, "GAME_UPDATE")[0];
        assert!(payload.get("board").is_none());
        assert!(payload.get("moveHistory").is_none());
        assert_eq!(payload["moveCount"], 0);
    }

    #[test]
    fn test_ai_seat_is_never_pushed() {
        let human = Uuid::new_v4();
        let registry = Arc::new(RecordingRegistry::with_users(&[human, AI_USER_ID]));
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Broadcaster::new(registry.clone(), metrics.clone(), false);

        let mut s = session(human, AI_USER_ID);
        s.category = SessionCategory::Ai {
            ai_color: crate::game::state::Color::White,
        };
        assert_eq!(broadcaster.game_update(&s, 0), 1);
        assert!(registry.received(AI_USER_ID, "GAME_UPDATE").is_empty());
        assert_eq!(metrics.pushes_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_declined_goes_to_challenger_only() {
        let (challenger, opponent) = (Uuid::new_v4(), Uuid::new_v4());
        let registry = Arc::new(RecordingRegistry::with_users(&[challenger, opponent]));
        let broadcaster = Broadcaster::new(registry.clone(), Arc::new(Metrics::new()), false);

        let id = Uuid::new_v4();
        assert!(broadcaster.negotiation_declined(challenger, id, opponent));
        let pushed = registry.received(challenger, "NEGOTIATION_DECLINED");
        assert_eq!(pushed[0]["negotiationId"], id.to_string());
        assert!(registry.received(opponent, "NEGOTIATION_DECLINED").is_empty());
    }

    #[test]
    fn test_disconnected_push_is_counted() {
        let registry = Arc::new(RecordingRegistry::default());
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Broadcaster::new(registry, metrics.clone(), false);
        assert!(!broadcaster.negotiation_declined(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()));
        assert_eq!(metrics.push_failures.load(Ordering::Relaxed), 1);
    }
}
