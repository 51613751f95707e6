use crate::error::StoreError;
use crate::session::{AuthBlob, Session};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const AUTH_KEY: &str = "greenie_auth";
const SESSION_KEY: &str = "greenie-session";

type Entries = BTreeMap<String, String>;

/// Opaque key-value file holding the session id and the cached auth blob.
///
/// Anything that fails to parse is treated as absent and overwritten on the
/// next write, so a corrupt file heals itself instead of blocking startup.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted session, minting and persisting an id on first run.
    pub fn load(&self) -> Session {
        let mut entries = self.read_entries();
        let mut dirty = false;

        let session_id = match entries.get(SESSION_KEY).filter(|id| !id.is_empty()) {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                tracing::info!(session_id = %id, "generated new client session id");
                entries.insert(SESSION_KEY.to_string(), id.clone());
                dirty = true;
                id
            }
        };

        let auth = match entries.get(AUTH_KEY) {
            Some(raw) => match serde_json::from_str::<AuthBlob>(raw) {
                Ok(blob) => Some(blob),
                Err(err) => {
                    tracing::warn!("discarding unreadable cached credentials: {err}");
                    entries.remove(AUTH_KEY);
                    dirty = true;
                    None
                }
            },
            None => None,
        };

        if dirty {
            if let Err(err) = self.write_entries(&entries) {
                tracing::warn!("failed to persist session store: {err}");
            }
        }

        let mut session = Session {
            session_id,
            ..Default::default()
        };
        if let Some(blob) = auth {
            session.sign_in(blob.token, blob.username);
        }
        session
    }

    /// Overwrites the persisted auth fields. A session without credentials
    /// removes them.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut entries = self.read_entries();
        entries.insert(SESSION_KEY.to_string(), session.session_id.clone());
        match (&session.auth_token, &session.username) {
            (Some(token), Some(username)) => {
                let blob = AuthBlob {
                    token: token.clone(),
                    username: username.clone(),
                };
                entries.insert(AUTH_KEY.to_string(), serde_json::to_string(&blob)?);
            }
            _ => {
                entries.remove(AUTH_KEY);
            }
        }
        self.write_entries(&entries)
    }

    /// Drops the auth blob only; the session id survives.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.read_entries();
        if entries.remove(AUTH_KEY).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)
    }

    fn read_entries(&self) -> Entries {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Entries::new(),
            Err(err) => {
                tracing::warn!("failed to read {}: {err}", self.path.display());
                return Entries::new();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    "session store {} is corrupt, starting fresh: {err}",
                    self.path.display()
                );
                Entries::new()
            }
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entries)?;
        fs::write(&tmp_path, bytes).map_err(|err| StoreError::io(&tmp_path, err))?;

        match fs::rename(&tmp_path, &self.path) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                if self.path.exists() {
                    fs::remove_file(&self.path).map_err(|err| StoreError::io(&self.path, err))?;
                    fs::rename(&tmp_path, &self.path)
                        .map_err(|err| StoreError::io(&self.path, err))?;
                    Ok(())
                } else {
                    Err(StoreError::io(&self.path, rename_err))
                }
            }
        }
    }
}
