//! Persisted session: bearer token plus the logged-in user's profile.
//!
//! Both values live under separate keys of a `KeyValueStore`. They are only
//! meaningful together, so a half-present or unreadable pair loads as the
//! empty session and is wiped.

use crate::model::UserProfile;
use crate::storage::{FileStore, KeyValueStore, StorageError};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "user_data";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }
}

pub struct SessionStore {
    storage: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Box::new(crate::storage::MemoryStore::new()))
    }

    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileStore::new(dir)))
    }

    /// Persist token and user. The user goes first and the token last, and
    /// `load` ignores a user without a token, so no reader sees one half.
    pub fn save(&self, token: &str, user: &UserProfile) -> Result<(), StorageError> {
        let user_json = serde_json::to_string(user).map_err(|e| StorageError::Encode {
            key: USER_KEY.to_string(),
            message: e.to_string(),
        })?;

        // A stale token must not pair up with the new user mid-write
        self.storage.remove(TOKEN_KEY)?;
        self.storage.set(USER_KEY, &user_json)?;
        self.storage.set(TOKEN_KEY, token)?;
        debug!(user_id = %user.user_id, role = %user.role, "session saved");
        Ok(())
    }

    /// Read the current session. Never fails: unreadable or inconsistent state
    /// is reported as the empty session and cleared.
    pub fn load(&self) -> Session {
        let token = self.storage.get(TOKEN_KEY);
        let user = self.storage.get(USER_KEY);

        let (token, user) = match (token, user) {
            (Ok(token), Ok(user)) => (token, user),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "session storage unreadable, clearing");
                self.clear_quietly();
                return Session::empty();
            }
        };

        match (token, user) {
            (None, None) => Session::empty(),
            (Some(token), Some(raw)) => match serde_json::from_str::<UserProfile>(&raw) {
                Ok(user) if !token.is_empty() => Session {
                    token: Some(token),
                    user: Some(user),
                },
                Ok(_) => {
                    warn!("empty session token, clearing");
                    self.clear_quietly();
                    Session::empty()
                }
                Err(e) => {
                    warn!(error = %e, "malformed user data in session, clearing");
                    self.clear_quietly();
                    Session::empty()
                }
            },
            _ => {
                warn!("incomplete session in storage, clearing");
                self.clear_quietly();
                Session::empty()
            }
        }
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(TOKEN_KEY)?;
        self.storage.remove(USER_KEY)?;
        debug!("session cleared");
        Ok(())
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.clear() {
            warn!(error = %e, "failed to clear session storage");
        }
    }

    /// Token of the current session, if it is complete
    pub fn token(&self) -> Option<String> {
        self.load().token
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.load().user
    }
}
