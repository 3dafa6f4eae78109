//! Match engine
//!
//! Owns the live session table and the negotiation lobby. Every command
//! first resolves expired deadlines on what it touches, then dispatches,
//! then lets the AI seat catch up, then enqueues persistence and pushes the
//! result. A periodic sweep does the same for sessions nobody is talking to.
//!
//! Lock order: lobby, session table, session, rng, pause cool-downs.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::ai::AiOpponent;
use crate::game::clock::PauseCooldowns;
use crate::game::constants::session::ENDED_RETENTION_MS;
use crate::game::dispatch::{dispatch, ActionResponse, DispatchContext, GameAction};
use crate::game::error::{ActionError, ErrorKind};
use crate::game::match_result::{resolve_scoring, ScoreAnalyzer};
use crate::game::modes::{create_session, driver_for, SessionSeed};
use crate::game::state::{
    GameMode, GameSettings, Phase, Session, SessionCategory, SessionId, UserId, AI_USER_ID,
};
use crate::lobby::manager::NegotiationManager;
use crate::lobby::negotiation::{action_point_cost, NegotiationError, NegotiationId};
use crate::lobby::player::{UserRecord, UserRegistry, UserStatus};
use crate::metrics::Metrics;
use crate::net::broadcast::{Broadcaster, ConnectionRegistry};
use crate::net::protocol::{ClientCommand, ClientResponse, LobbyCommand};
use crate::store::{Persistence, WriteBehind};
use crate::util::time::Timestamp;

/// Upper bound on consecutive AI actions per engine step
const MAX_AI_STEPS: usize = 64;
/// Fresh picks before the AI falls back
const AI_RETRIES: usize = 8;
/// Chained deadline transitions resolved per step
const MAX_ADVANCE_STEPS: usize = 16;
const MAX_NICKNAME_CHARS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("Identify with HELLO first")]
    NotIdentified,
    #[error("Connection is already identified")]
    AlreadyIdentified,
    #[error("Invalid nickname")]
    InvalidNickname,
    #[error("Finish your current game or negotiation first")]
    Busy,
    #[error("Server is at capacity")]
    Capacity,
    #[error("No AI opponent available")]
    AiUnavailable,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Action(e) => e.kind(),
            EngineError::Negotiation(e) => e.kind(),
            EngineError::Busy => ErrorKind::StateConflict,
            EngineError::Capacity => ErrorKind::Resource,
            _ => ErrorKind::Validation,
        }
    }
}

/// Everything the engine talks to
pub struct Collaborators {
    pub store: Arc<dyn Persistence>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub analyzer: Arc<dyn ScoreAnalyzer>,
    pub ai: Option<Arc<dyn AiOpponent>>,
    pub metrics: Arc<Metrics>,
}

#[derive(Default)]
struct Lobby {
    negotiations: NegotiationManager,
    users: UserRegistry,
}

pub struct MatchEngine {
    lobby: Mutex<Lobby>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    rng: Mutex<StdRng>,
    cooldowns: Mutex<PauseCooldowns>,
    analyzer: Arc<dyn ScoreAnalyzer>,
    ai: Option<Arc<dyn AiOpponent>>,
    store: Arc<dyn Persistence>,
    writer: WriteBehind,
    registry: Arc<dyn ConnectionRegistry>,
    broadcaster: Broadcaster,
    metrics: Arc<Metrics>,
    max_sessions: usize,
}

impl MatchEngine {
    pub fn new(config: &ServerConfig, deps: Collaborators) -> Self {
        Self {
            lobby: Mutex::new(Lobby::default()),
            sessions: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            cooldowns: Mutex::new(PauseCooldowns::new()),
            analyzer: deps.analyzer,
            ai: deps.ai,
            writer: WriteBehind::spawn(deps.store.clone()),
            store: deps.store,
            broadcaster: Broadcaster::new(
                deps.registry.clone(),
                deps.metrics.clone(),
                config.bandwidth_saving,
            ),
            registry: deps.registry,
            metrics: deps.metrics,
            max_sessions: config.max_sessions,
        }
    }

    /// Deterministic randomness, for tests and replays
    pub fn seeded(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Bind an identity to the server and restore its last state
    pub fn connect(
        &self,
        user: UserId,
        nickname: &str,
    ) -> Result<UserRecord, EngineError> {
        let nickname = sanitize_nickname(nickname).ok_or(EngineError::InvalidNickname)?;
        if user == AI_USER_ID {
            return Err(EngineError::InvalidNickname);
        }

        let mut guard = self.lobby.lock();
        let before = guard.users.statuses();
        let mut record = match guard.users.get(user).cloned() {
            Some(mut known) => {
                if known.status == UserStatus::Offline {
                    known.status = UserStatus::Online;
                }
                known
            }
            None => {
                let mut stored = match self.store.load_user(user) {
                    Ok(Some(stored)) => stored,
                    Ok(None) => UserRecord::new(user, nickname.clone()),
                    Err(e) => {
                        warn!("Failed to load user {}: {}", user, e);
                        UserRecord::new(user, nickname.clone())
                    }
                };
                stored.status = match stored.status {
                    UserStatus::InGame(id) if self.restore_session(id) => UserStatus::InGame(id),
                    _ => UserStatus::Online,
                };
                stored
            }
        };
        record.nickname = nickname;
        guard.users.upsert(record.clone());
        self.writer.save_user(&record);
        info!("User {} ({}) connected: {:?}", user, record.nickname, record.status);
        self.publish_lobby(guard, &before, false);
        Ok(record)
    }

    /// Connection dropped: walk away from negotiations and spectating
    pub fn disconnect(&self, user: UserId, now: Timestamp) {
        let mut guard = self.lobby.lock();
        let before = guard.users.statuses();
        let lobby = &mut *guard;
        let notices = abandon_negotiations(lobby, user);

        match lobby.users.status(user) {
            UserStatus::InGame(id) if self.is_live(id) => {}
            UserStatus::Spectating(id) => {
                self.remove_spectator(id, user, now);
                lobby.users.set_status(user, UserStatus::Offline);
            }
            _ => {
                lobby.users.set_status(user, UserStatus::Offline);
            }
        }
        debug!("User {} disconnected", user);
        self.publish_lobby(guard, &before, !notices.is_empty());
        for (challenger, id) in notices {
            self.broadcaster.negotiation_declined(challenger, id, user);
        }
    }

    /// Run one client command from `user`
    pub fn handle_command(
        &self,
        user: UserId,
        command: ClientCommand,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        let result = match command {
            ClientCommand::Game { game_id, action } => self.game_command(user, game_id, &action, now),
            ClientCommand::Lobby(command) => self.lobby_command(user, command, now),
        };
        self.metrics.record_command(result.is_ok());
        if let Err(e) = &result {
            debug!("Command from {} rejected: {}", user, e);
        }
        result
    }

    /// Resolve deadlines everywhere. Returns the number of sessions that changed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let started = Instant::now();

        {
            let mut guard = self.lobby.lock();
            let before = guard.users.statuses();
            let lobby = &mut *guard;
            let expired = lobby.negotiations.advance(&mut lobby.users, now);
            self.metrics
                .negotiations_active
                .store(lobby.negotiations.len() as u64, Ordering::Relaxed);
            if !expired.is_empty() {
                debug!("{} negotiations lapsed", expired.len());
                self.publish_lobby(guard, &before, true);
            }
        }

        let handles: Vec<Arc<Mutex<Session>>> = self.sessions.read().values().cloned().collect();
        let advanced = handles.par_iter().filter(|h| self.tick(h, now)).count();

        self.drop_finished(now);
        self.metrics
            .persistence_failures
            .store(self.writer.failures(), Ordering::Relaxed);
        self.metrics.record_sweep(started.elapsed(), advanced);
        advanced
    }

    /// Flush pending writes and stop the persistence worker
    pub fn shutdown(&self) {
        self.writer.shutdown();
        info!("Engine stopped ({} writes persisted)", self.writer.written());
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.handle(id).map(|h| h.lock().clone())
    }

    pub fn user(&self, id: UserId) -> Option<UserRecord> {
        self.lobby.lock().users.get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn negotiation_count(&self) -> usize {
        self.lobby.lock().negotiations.len()
    }

    fn game_command(
        &self,
        user: UserId,
        game_id: SessionId,
        action: &GameAction,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        let handle = self.handle(game_id).ok_or(ActionError::SessionNotFound)?;
        let mut session = handle.lock();
        let was_ended = session.is_ended();

        let mut rng = self.rng.lock();
        let mut changed = self.settle(&mut session, now, &mut rng);
        let result = {
            let mut ctx = DispatchContext {
                now,
                rng: &mut *rng,
                cooldowns: &self.cooldowns,
            };
            dispatch(&mut session, user, action, &mut ctx)
        };
        if result.is_ok() {
            changed = true;
            self.settle(&mut session, now, &mut rng);
            self.drive_ai(&mut session, now, &mut rng);
        }
        drop(rng);

        if changed {
            self.publish(&session, was_ended, now);
        }
        Ok(result?.into())
    }

    fn lobby_command(
        &self,
        user: UserId,
        command: LobbyCommand,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        match command {
            LobbyCommand::Hello { .. } => Err(EngineError::AlreadyIdentified),
            LobbyCommand::ChallengeUser {
                opponent_id,
                mode,
                settings,
                ranked,
            } => {
                let mut guard = self.identified(user)?;
                let before = guard.users.statuses();
                let lobby = &mut *guard;
                self.free_for_challenge(lobby, user, now)?;
                let id = lobby.negotiations.propose(
                    &mut lobby.users,
                    user,
                    opponent_id,
                    mode,
                    settings,
                    ranked,
                    now,
                )?;
                self.publish_lobby(guard, &before, true);
                Ok(ClientResponse::Negotiation { negotiation_id: id })
            }
            LobbyCommand::SendChallenge {
                negotiation_id,
                settings,
            } => self.negotiation_op(negotiation_id, |lobby| {
                lobby
                    .negotiations
                    .send(&mut lobby.users, negotiation_id, user, settings, now)
            }),
            LobbyCommand::UpdateNegotiation {
                negotiation_id,
                settings,
            } => self.negotiation_op(negotiation_id, |lobby| {
                lobby
                    .negotiations
                    .counter(&mut lobby.users, negotiation_id, user, settings, now)
            }),
            LobbyCommand::AcceptNegotiation { negotiation_id } => {
                self.accept(user, negotiation_id, now)
            }
            LobbyCommand::DeclineNegotiation { negotiation_id } => {
                let mut guard = self.lobby.lock();
                let before = guard.users.statuses();
                let lobby = &mut *guard;
                let outcome = lobby
                    .negotiations
                    .decline(&mut lobby.users, negotiation_id, user)?;
                if outcome.removed {
                    self.publish_lobby(guard, &before, true);
                }
                if let Some(challenger) = outcome.notify_challenger {
                    self.broadcaster
                        .negotiation_declined(challenger, negotiation_id, user);
                }
                Ok(ClientResponse::Negotiation { negotiation_id })
            }
            LobbyCommand::RequestRematch { game_id } => {
                let original = self
                    .session(game_id)
                    .ok_or(ActionError::SessionNotFound)?;
                let mut guard = self.lobby.lock();
                let before = guard.users.statuses();
                let lobby = &mut *guard;
                let id = lobby
                    .negotiations
                    .request_rematch(&mut lobby.users, &original, user, now)?;
                self.publish_lobby(guard, &before, true);
                Ok(ClientResponse::Negotiation { negotiation_id: id })
            }
            LobbyCommand::SpectateGame { game_id } => self.spectate(user, game_id, now),
            LobbyCommand::LeaveSpectate { game_id } => {
                let mut guard = self.identified(user)?;
                let before = guard.users.statuses();
                if guard.users.status(user) == UserStatus::Spectating(game_id) {
                    self.remove_spectator(game_id, user, now);
                    guard.users.set_status(user, UserStatus::Online);
                }
                self.publish_lobby(guard, &before, false);
                Ok(ClientResponse::Game { game_id })
            }
            LobbyCommand::EnterWaitingRoom {} => {
                let mut guard = self.identified(user)?;
                let before = guard.users.statuses();
                self.leave_current(&mut guard, user, now)?;
                guard.users.set_status(user, UserStatus::Waiting);
                self.publish_lobby(guard, &before, false);
                Ok(ActionResponse::Ack.into())
            }
            LobbyCommand::LeaveWaitingRoom {} => {
                let mut guard = self.identified(user)?;
                let before = guard.users.statuses();
                let lobby = &mut *guard;
                let notices = abandon_negotiations(lobby, user);
                if matches!(
                    lobby.users.status(user),
                    UserStatus::Waiting | UserStatus::Negotiating
                ) {
                    lobby.users.set_status(user, UserStatus::Online);
                }
                self.publish_lobby(guard, &before, !notices.is_empty());
                for (challenger, id) in notices {
                    self.broadcaster.negotiation_declined(challenger, id, user);
                }
                Ok(ActionResponse::Ack.into())
            }
            LobbyCommand::StartAiGame {
                mode,
                settings,
                ai_color,
                floor,
            } => {
                let category = match floor {
                    Some(floor) => SessionCategory::Tower { floor, ai_color },
                    None => SessionCategory::Ai { ai_color },
                };
                self.start_ai_game(user, mode, settings, category, now)
            }
        }
    }

    fn accept(
        &self,
        user: UserId,
        negotiation_id: NegotiationId,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        self.ensure_capacity()?;
        let mut guard = self.lobby.lock();
        let before = guard.users.statuses();
        let count_before = guard.negotiations.len();
        let lobby = &mut *guard;
        let outcome = {
            let mut rng = self.rng.lock();
            lobby
                .negotiations
                .accept(&mut lobby.users, negotiation_id, user, now, &mut *rng)
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if guard.negotiations.len() != count_before {
                    self.publish_lobby(guard, &before, true);
                }
                return Err(e.into());
            }
        };

        let session = outcome.session;
        let game_id = session.id;
        self.publish(&session, false, now);
        self.insert(session);
        self.publish_lobby(guard, &before, true);
        Ok(ClientResponse::Game { game_id })
    }

    fn start_ai_game(
        &self,
        user: UserId,
        mode: GameMode,
        settings: GameSettings,
        category: SessionCategory,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        if self.ai.is_none() {
            return Err(EngineError::AiUnavailable);
        }
        settings.validate(mode).map_err(EngineError::InvalidSettings)?;
        self.ensure_capacity()?;

        let mut guard = self.identified(user)?;
        let before = guard.users.statuses();
        self.leave_current(&mut guard, user, now)?;
        if !guard.users.deduct(user, action_point_cost(mode)) {
            return Err(NegotiationError::InsufficientResource.into());
        }

        let mut session = {
            let mut rng = self.rng.lock();
            let mut session = create_session(
                SessionSeed {
                    id: Uuid::new_v4(),
                    mode,
                    settings,
                    player1_id: user,
                    player2_id: AI_USER_ID,
                    category,
                    ranked: false,
                    rematch_of: None,
                },
                now,
                &mut *rng,
            );
            self.drive_ai(&mut session, now, &mut rng);
            session
        };
        session.touch(now);
        let game_id = session.id;
        guard.users.set_status(user, UserStatus::InGame(game_id));

        self.publish(&session, false, now);
        self.insert(session);
        self.publish_lobby(guard, &before, false);
        Ok(ClientResponse::Game { game_id })
    }

    fn spectate(
        &self,
        user: UserId,
        game_id: SessionId,
        now: Timestamp,
    ) -> Result<ClientResponse, EngineError> {
        let mut guard = self.identified(user)?;
        let before = guard.users.statuses();
        let handle = self.handle(game_id).ok_or(ActionError::SessionNotFound)?;
        if handle.lock().involves(user) {
            return Err(ActionError::InvalidTarget("you are playing this game").into());
        }
        if guard.users.status(user) != UserStatus::Spectating(game_id) {
            self.leave_current(&mut guard, user, now)?;
        }
        {
            let mut session = handle.lock();
            session.spectators.insert(user);
            self.broadcaster.game_update(&session, now);
        }
        guard.users.set_status(user, UserStatus::Spectating(game_id));
        self.publish_lobby(guard, &before, false);
        Ok(ClientResponse::Game { game_id })
    }

    /// Run a negotiation operation and publish if anything moved
    fn negotiation_op(
        &self,
        id: NegotiationId,
        op: impl FnOnce(&mut Lobby) -> Result<(), NegotiationError>,
    ) -> Result<ClientResponse, EngineError> {
        let mut guard = self.lobby.lock();
        let before = guard.users.statuses();
        let count_before = guard.negotiations.len();
        let result = op(&mut *guard);
        if result.is_ok() || guard.negotiations.len() != count_before {
            self.publish_lobby(guard, &before, true);
        }
        result?;
        Ok(ClientResponse::Negotiation { negotiation_id: id })
    }

    /// Lobby guard for a user that said HELLO
    fn identified(&self, user: UserId) -> Result<MutexGuard<'_, Lobby>, EngineError> {
        let guard = self.lobby.lock();
        if guard.users.status(user) == UserStatus::Offline {
            return Err(EngineError::NotIdentified);
        }
        Ok(guard)
    }

    /// Leave spectating before doing something else; live games and negotiations block
    fn leave_current(&self, lobby: &mut Lobby, user: UserId, now: Timestamp) -> Result<(), EngineError> {
        match lobby.users.status(user) {
            UserStatus::Negotiating => Err(EngineError::Busy),
            UserStatus::InGame(id) if self.is_live(id) => Err(EngineError::Busy),
            UserStatus::Spectating(id) => {
                self.remove_spectator(id, user, now);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Step out of a finished or spectated game. A held draft stays for the
    /// manager to discard.
    fn free_for_challenge(
        &self,
        lobby: &mut Lobby,
        user: UserId,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let status = lobby.users.status(user);
        if status == UserStatus::Negotiating {
            return Ok(());
        }
        self.leave_current(lobby, user, now)?;
        if status.session().is_some() {
            lobby.users.set_status(user, UserStatus::Online);
        }
        Ok(())
    }

    /// Resolve every expired deadline, then scoring
    fn settle(&self, session: &mut Session, now: Timestamp, rng: &mut StdRng) -> bool {
        let driver = driver_for(session.mode);
        let mut changed = false;
        for _ in 0..MAX_ADVANCE_STEPS {
            if !driver.advance(session, now, rng) {
                break;
            }
            changed = true;
        }
        if resolve_scoring(session, self.analyzer.as_ref(), now) {
            changed = true;
        }
        if changed {
            session.touch(now);
        }
        changed
    }

    /// Let the AI seat act until it is the human's move
    fn drive_ai(&self, session: &mut Session, now: Timestamp, rng: &mut StdRng) -> bool {
        let Some(ai) = self.ai.as_deref() else {
            return false;
        };
        if session.category.ai_color().is_none() {
            return false;
        }

        let mut changed = false;
        for _ in 0..MAX_AI_STEPS {
            if session.is_ended() || self.cooldowns.lock().is_paused(session.id) {
                break;
            }
            let acted = match session.phase {
                Phase::CurlingRoundEnd | Phase::ThiefRoundEnd => self
                    .ai_act(session, &GameAction::ConfirmRoundEnd {}, now, rng)
                    .is_ok(),
                _ if session.is_ai_turn() => self.ai_turn(ai, session, now, rng),
                _ => false,
            };
            if !acted {
                break;
            }
            changed = true;
            self.settle(session, now, rng);
        }
        changed
    }

    fn ai_turn(
        &self,
        ai: &dyn AiOpponent,
        session: &mut Session,
        now: Timestamp,
        rng: &mut StdRng,
    ) -> bool {
        for _ in 0..AI_RETRIES {
            let Some(action) = ai.choose_action(session, rng) else {
                return false;
            };
            match self.ai_act(session, &action, now, rng) {
                Ok(_) => return true,
                Err(e) => debug!("AI pick {} rejected in {}: {}", action.tag(), session.id, e),
            }
        }
        ai.fallback(session)
            .is_some_and(|action| self.ai_act(session, &action, now, rng).is_ok())
    }

    fn ai_act(
        &self,
        session: &mut Session,
        action: &GameAction,
        now: Timestamp,
        rng: &mut StdRng,
    ) -> Result<ActionResponse, ActionError> {
        let mut ctx = DispatchContext {
            now,
            rng,
            cooldowns: &self.cooldowns,
        };
        let result = dispatch(session, AI_USER_ID, action, &mut ctx);
        if result.is_ok() {
            self.metrics.ai_actions.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Sweep step for one session
    fn tick(&self, handle: &Mutex<Session>, now: Timestamp) -> bool {
        let mut session = handle.lock();
        if session.is_ended() {
            return false;
        }
        let mut rng = self.rng.lock();
        let mut changed = self.settle(&mut session, now, &mut rng);
        changed |= self.drive_ai(&mut session, now, &mut rng);
        drop(rng);
        if changed {
            self.publish(&session, false, now);
        }
        changed
    }

    /// Persist and push a changed session
    fn publish(&self, session: &Session, was_ended: bool, now: Timestamp) {
        if session.is_ended() && !was_ended {
            self.metrics.sessions_ended.fetch_add(1, Ordering::Relaxed);
            self.cooldowns.lock().forget(session.id);
        }
        self.writer.save_session(session);
        self.broadcaster.game_update(session, now);
    }

    /// Save changed user records and push the lobby state
    fn publish_lobby(
        &self,
        guard: MutexGuard<'_, Lobby>,
        before: &HashMap<UserId, UserStatus>,
        negotiations_changed: bool,
    ) {
        let statuses = guard.users.statuses();
        let mut status_changed = false;
        for (id, status) in &statuses {
            if before.get(id) != Some(status) {
                status_changed = true;
                if let Some(record) = guard.users.get(*id) {
                    self.writer.save_user(record);
                }
            }
        }
        // Action points move without a status change on AI starts
        if !status_changed && !negotiations_changed {
            return;
        }
        self.metrics
            .negotiations_active
            .store(guard.negotiations.len() as u64, Ordering::Relaxed);

        if negotiations_changed {
            let snapshot = guard.negotiations.snapshot(&guard.users);
            drop(guard);
            self.broadcaster.negotiation_update(snapshot);
        } else {
            drop(guard);
            self.broadcaster.user_status_update(statuses);
        }
    }

    /// Drop sessions that ended long enough ago
    fn drop_finished(&self, now: Timestamp) {
        let mut guard = self.lobby.lock();
        let before = guard.users.statuses();

        let removed: Vec<Session> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, h)| {
                    h.lock()
                        .outcome
                        .as_ref()
                        .is_some_and(|o| now - o.ended_at >= ENDED_RETENTION_MS)
                })
                .map(|(id, _)| *id)
                .collect();
            stale
                .iter()
                .filter_map(|id| sessions.remove(id))
                .map(|h| h.lock().clone())
                .collect()
        };
        if removed.is_empty() {
            return;
        }

        let connected = self.registry.connected_users();
        for session in &removed {
            self.cooldowns.lock().forget(session.id);
            let viewers = session
                .participants()
                .into_iter()
                .chain(session.spectators.iter().copied());
            for user in viewers {
                let status = guard.users.status(user);
                if status.session() == Some(session.id) {
                    let next = if connected.contains(&user) {
                        UserStatus::Online
                    } else {
                        UserStatus::Offline
                    };
                    guard.users.set_status(user, next);
                }
            }
        }
        self.metrics
            .sessions_active
            .fetch_sub(removed.len() as u64, Ordering::Relaxed);
        info!("Dropped {} finished sessions", removed.len());
        self.publish_lobby(guard, &before, false);
    }

    /// Load a persisted session back into memory. True if it is available.
    fn restore_session(&self, id: SessionId) -> bool {
        if self.sessions.read().contains_key(&id) {
            return true;
        }
        match self.store.load_session(id) {
            Ok(Some(session)) if !session.is_ended() => {
                info!("Restored session {} from storage", id);
                self.insert(session);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to load session {}: {}", id, e);
                false
            }
        }
    }

    fn remove_spectator(&self, id: SessionId, user: UserId, now: Timestamp) {
        if let Some(handle) = self.handle(id) {
            let mut session = handle.lock();
            if session.spectators.remove(&user) {
                self.broadcaster.game_update(&session, now);
            }
        }
    }

    fn is_live(&self, id: SessionId) -> bool {
        self.handle(id).is_some_and(|h| !h.lock().is_ended())
    }

    fn handle(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(&id).cloned()
    }

    fn ensure_capacity(&self) -> Result<(), EngineError> {
        if self.sessions.read().len() >= self.max_sessions {
            warn!("Session table full ({} sessions)", self.max_sessions);
            return Err(EngineError::Capacity);
        }
        Ok(())
    }

    fn insert(&self, session: Session) {
        self.sessions
            .write()
            .insert(session.id, Arc::new(Mutex::new(session)));
        self.metrics.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.metrics.sessions_active.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decline everything `user` is part of; returns challengers to notify
fn abandon_negotiations(lobby: &mut Lobby, user: UserId) -> Vec<(UserId, NegotiationId)> {
    let mut notices = Vec::new();
    for id in lobby.negotiations.involving(user) {
        if let Ok(outcome) = lobby.negotiations.decline(&mut lobby.users, id, user) {
            if let Some(challenger) = outcome.notify_challenger {
                notices.push((challenger, id));
            }
        }
    }
    notices
}

/// Trim, strip control and markup characters, collapse whitespace
fn sanitize_nickname(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '&'))
        .take(MAX_NICKNAME_CHARS)
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}
