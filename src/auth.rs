use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything `auth login` records: the bearer token plus the acting
/// user's identity, scoped to the API base URL the token was issued
/// against. The identity labels the user's own messages and drives the
/// self-leave transition in the group registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    api_base_url: Option<String>,
    updated_at: Option<i64>,
}

impl Session {
    fn belongs_to(&self, api_base_url: &str) -> bool {
        self.api_base_url
            .as_deref()
            .is_none_or(|stored| stored == api_base_url)
    }
}

/// On-disk session storage: a mode-0600 JSON file under the data dir.
/// A session saved against a different API base URL is treated as
/// absent, and `ORGCHAT_TOKEN` overrides the stored token when set.
pub struct SessionStore {
    path: PathBuf,
    api_base_url: String,
}

impl SessionStore {
    pub fn new(path: PathBuf, api_base_url: String) -> Self {
        Self { path, api_base_url }
    }

    pub fn load(&self) -> Result<Session, AuthError> {
        let mut session = match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let stored: Session = serde_json::from_str(&contents)?;
                if stored.belongs_to(&self.api_base_url) {
                    stored
                } else {
                    Session::default()
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Session::default(),
            Err(err) => return Err(AuthError::Io(err)),
        };
        if let Ok(token) = env::var("ORGCHAT_TOKEN") {
            if !token.trim().is_empty() {
                session.token = Some(token);
            }
        }
        session.token = session.token.filter(|token| !token.trim().is_empty());
        Ok(session)
    }

    pub fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.token)
    }

    /// Saves a new token, merging in any identity fields provided and
    /// keeping previously recorded ones otherwise.
    pub fn store(
        &self,
        token: &str,
        user_id: Option<i64>,
        user_name: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut session = self.load()?;
        session.token = Some(token.to_string());
        if user_id.is_some() {
            session.user_id = user_id;
            session.user_name = user_name.map(str::to_string);
        }
        session.api_base_url = Some(self.api_base_url.clone());
        session.updated_at = Some(current_epoch_seconds() as i64);
        self.write(&session)
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err)),
        }
    }

    fn write(&self, session: &Session) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            restrict_permissions(parent, 0o700)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        restrict_permissions(&self.path, 0o600)?;
        Ok(())
    }
}

fn current_epoch_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path, base_url: &str) -> SessionStore {
        SessionStore::new(dir.join("session.json"), base_url.to_string())
    }

    #[test]
    fn session_round_trips_token_and_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path(), "https://portal.example.org/api");
        assert!(store.token().expect("token").is_none());

        store
            .store("tok-123", Some(42), Some("Riley Cruz"))
            .expect("store");
        let session = store.load().expect("load");
        assert_eq!(session.token.as_deref(), Some("tok-123"));
        assert_eq!(session.user_id, Some(42));
        assert_eq!(session.user_name.as_deref(), Some("Riley Cruz"));

        store.clear().expect("clear");
        assert!(store.load().expect("load").token.is_none());
    }

    #[test]
    fn storing_a_new_token_keeps_the_recorded_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path(), "https://portal.example.org/api");
        store
            .store("tok-1", Some(42), Some("Riley Cruz"))
            .expect("first store");
        store.store("tok-2", None, None).expect("second store");

        let session = store.load().expect("load");
        assert_eq!(session.token.as_deref(), Some("tok-2"));
        assert_eq!(session.user_id, Some(42));
        assert_eq!(session.user_name.as_deref(), Some("Riley Cruz"));
    }

    #[test]
    fn session_is_ignored_when_the_base_url_changed() {
        let dir = tempfile::tempdir().expect("tempdir");
        store(dir.path(), "https://portal.example.org/api")
            .store("tok-123", Some(42), None)
            .expect("store");

        let other = store(dir.path(), "https://staging.example.org/api");
        let session = other.load().expect("load");
        assert!(session.token.is_none());
        assert!(session.user_id.is_none());
    }

    #[test]
    fn blank_stored_token_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path(), "https://portal.example.org/api");
        store.store("   ", None, None).expect("store");
        assert!(store.token().expect("token").is_none());
    }
}
