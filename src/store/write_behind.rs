//! Fire-and-forget persistence queue
//!
//! A single worker thread drains a channel of snapshots. Failures are logged
//! and counted; the next write of the same record supersedes the failed one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::Persistence;
use crate::game::state::Session;
use crate::lobby::player::UserRecord;

enum WriteJob {
    Session(Box<Session>),
    User(UserRecord),
    Shutdown,
}

pub struct WriteBehind {
    tx: Sender<WriteJob>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
}

impl WriteBehind {
    pub fn spawn(store: Arc<dyn Persistence>) -> Self {
        let (tx, rx) = unbounded();
        let failures = Arc::new(AtomicU64::new(0));
        let written = Arc::new(AtomicU64::new(0));
        let worker = {
            let failures = failures.clone();
            let written = written.clone();
            std::thread::Builder::new()
                .name("write-behind".to_string())
                .spawn(move || run(rx, store, failures, written))
                .map_err(|e| tracing::error!("Failed to spawn write-behind worker: {}", e))
                .ok()
        };
        Self {
            tx,
            worker: Mutex::new(worker),
            failures,
            written,
        }
    }

    pub fn save_session(&self, session: &Session) {
        self.send(WriteJob::Session(Box::new(session.clone())));
    }

    pub fn save_user(&self, user: &UserRecord) {
        self.send(WriteJob::User(user.clone()));
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Drain the queue and stop the worker
    pub fn shutdown(&self) {
        let _ = self.tx.send(WriteJob::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Write-behind worker panicked");
            }
        }
    }

    fn send(&self, job: WriteJob) {
        if self.tx.send(job).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Write-behind queue closed; dropping write");
        }
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    rx: Receiver<WriteJob>,
    store: Arc<dyn Persistence>,
    failures: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
) {
    while let Ok(job) = rx.recv() {
        let result = match &job {
            WriteJob::Session(session) => store.save_session(session),
            WriteJob::User(user) => store.save_user(user),
            WriteJob::Shutdown => break,
        };
        match result {
            Ok(()) => {
                written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Persistence write failed: {}", e);
            }
        }
    }
    tracing::debug!("Write-behind worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{GameMode, GameSettings, SessionCategory, SessionId, UserId};
    use crate::store::{MemoryStore, StoreError};
    use uuid::Uuid;

    struct Failing;

    impl Persistence for Failing {
        fn load_session(&self, _id: SessionId) -> Result<Option<Session>, StoreError> {
            Ok(None)
        }
        fn save_session(&self, _session: &Session) -> Result<(), StoreError> {
            Err(StoreError::Encode("disk full".to_string()))
        }
        fn load_user(&self, _id: UserId) -> Result<Option<UserRecord>, StoreError> {
            Ok(None)
        }
        fn save_user(&self, _user: &UserRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            GameMode::Standard,
            GameSettings::default(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            SessionCategory::Pvp,
            0,
        )
    }

    #[test]
    fn test_writes_reach_store_after_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let queue = WriteBehind::spawn(store.clone());
        let s = session();
        queue.save_session(&s);
        queue.save_user(&UserRecord::new(Uuid::new_v4(), "lee".to_string()));
        queue.shutdown();

        assert_eq!(queue.written(), 2);
        assert_eq!(store.load_session(s.id).unwrap(), Some(s));
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let queue = WriteBehind::spawn(Arc::new(Failing));
        queue.save_session(&session());
        queue.save_user(&UserRecord::new(Uuid::new_v4(), "park".to_string()));
        queue.shutdown();

        assert_eq!(queue.failures(), 1);
        assert_eq!(queue.written(), 1);
    }
}
