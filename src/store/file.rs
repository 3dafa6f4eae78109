//! Snapshot-per-record file store
//!
//! Records are bincode encoded (legacy config, fixed-size integers) and
//! written to a temp file before being renamed into place.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Persistence, StoreError};
use crate::game::state::{Session, SessionId, UserId};
use crate::lobby::player::UserRecord;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create `root/sessions` and `root/users` if missing
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("users"))?;
        tracing::info!("File store at {}", root.display());
        Ok(Self { root })
    }

    fn session_path(&self, id: SessionId) -> PathBuf {
        self.root.join("sessions").join(format!("{id}.bin"))
    }

    fn user_path(&self, id: UserId) -> PathBuf {
        self.root.join("users").join(format!("{id}.bin"))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::legacy())
        .map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = encode(value)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl Persistence for FileStore {
    fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        read(&self.session_path(id))
    }

    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        write(&self.session_path(session.id), session)
    }

    fn load_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        read(&self.user_path(id))
    }

    fn save_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        write(&self.user_path(user.id), user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::modes::{create_session, SessionSeed};
    use crate::game::state::{GameMode, GameSettings, SessionCategory};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("baduk-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_session_survives_reload() {
        let root = temp_root();
        let store = FileStore::open(&root).unwrap();
        let session = create_session(
            SessionSeed {
                id: Uuid::new_v4(),
                mode: GameMode::Curling,
                settings: GameSettings {
                    board_size: 9,
                    ..Default::default()
                },
                player1_id: Uuid::new_v4(),
                player2_id: Uuid::new_v4(),
                category: SessionCategory::Pvp,
                ranked: true,
                rematch_of: None,
            },
            0,
            &mut StdRng::seed_from_u64(9),
        );

        store.save_session(&session).unwrap();
        let loaded = store.load_session(session.id).unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(store.load_session(Uuid::new_v4()).unwrap().is_none());

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_user_round_trip() {
        let root = temp_root();
        let store = FileStore::open(&root).unwrap();
        let user = UserRecord::new(Uuid::new_v4(), "kim".to_string());

        store.save_user(&user).unwrap();
        assert_eq!(store.load_user(user.id).unwrap(), Some(user));

        std::fs::remove_dir_all(root).ok();
    }
}
