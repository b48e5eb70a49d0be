//! Explicit session context.
//!
//! One [`SessionStore`] is created at startup and shared by `Arc` with every
//! component that needs the current user or credential. Stored data is
//! untrusted: anything that fails to parse is discarded, never panicked on.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::user::{User, UserId};

pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "auth_user";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage failed for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("could not encode the user snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait SessionStorage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn write(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl InMemorySessionStorage {
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values.into_iter().map(|(key, value)| (key.into(), value.into())).collect();
        Self { values: Mutex::new(values) }
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        match self.values.lock() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn read(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.values().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.values().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.values().remove(key);
        Ok(())
    }
}

/// One file per key under `dir`.
#[derive(Clone, Debug)]
pub struct FileSessionStorage {
    dir: PathBuf,
}

impl FileSessionStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SessionStorage for FileSessionStorage {
    fn read(&self, key: &str) -> Result<Option<String>, SessionError> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SessionError::Io { key: key.to_owned(), source }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(self.path(key), value))
            .map_err(|source| SessionError::Io { key: key.to_owned(), source })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { key: key.to_owned(), source }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub token: SecretString,
    pub user: User,
    /// Bumped on every sign-in so a late 401 from an old session cannot tear
    /// down a newer one.
    pub generation: u64,
}

#[derive(Clone, Debug, Default)]
pub enum SessionState {
    #[default]
    Initializing,
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(session) => Some(&session.user),
            Self::Initializing | Self::Unauthenticated => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Restored { user_id: UserId },
    SignedIn { user_id: UserId },
    SignedOut,
    Expired { generation: u64 },
    StorageDiscarded { reason: String },
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    generation: u64,
}

pub struct SessionStore<S> {
    storage: S,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S> SessionStore<S>
where
    S: SessionStorage,
{
    pub fn new(storage: S) -> Self {
        let (events, _) = broadcast::channel(32);
        Self { storage, inner: Mutex::new(SessionInner::default()), events }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Resolves `Initializing` from persisted storage.
    pub fn load(&self) -> SessionState {
        let mut inner = self.lock();
        match self.read_persisted() {
            Ok(Some((token, user))) => {
                inner.generation += 1;
                let user_id = user.id.clone();
                inner.state = SessionState::Authenticated(Session {
                    token,
                    user,
                    generation: inner.generation,
                });
                info!(event_name = "session.restored", user_id = %user_id, "restored stored session");
                self.publish(SessionEvent::Restored { user_id });
            }
            Ok(None) => {
                inner.state = SessionState::Unauthenticated;
            }
            Err(reason) => {
                warn!(event_name = "session.storage_discarded", reason = %reason, "discarding stored session");
                self.clear_storage();
                inner.state = SessionState::Unauthenticated;
                self.publish(SessionEvent::StorageDiscarded { reason });
            }
        }
        inner.state.clone()
    }

    fn read_persisted(&self) -> Result<Option<(SecretString, User)>, String> {
        let token = self.storage.read(TOKEN_KEY).map_err(|error| error.to_string())?;
        let user = self.storage.read(USER_KEY).map_err(|error| error.to_string())?;

        match (token, user) {
            (None, None) => Ok(None),
            (Some(token), Some(user)) => {
                let token = token.trim();
                if token.is_empty() {
                    return Err("stored token is blank".to_owned());
                }
                let user: User = serde_json::from_str(&user)
                    .map_err(|error| format!("stored user is unreadable: {error}"))?;
                Ok(Some((SecretString::from(token.to_owned()), user)))
            }
            (Some(_), None) => Err("stored token has no user snapshot".to_owned()),
            (None, Some(_)) => Err("stored user snapshot has no token".to_owned()),
        }
    }

    fn clear_storage(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(error) = self.storage.remove(key) {
                warn!(event_name = "session.storage_clear_failed", key, error = %error, "could not clear stored session");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn current(&self) -> Option<Session> {
        match &self.lock().state {
            SessionState::Authenticated(session) => Some(session.clone()),
            SessionState::Initializing | SessionState::Unauthenticated => None,
        }
    }

    pub fn login(&self, token: SecretString, user: User) -> Result<Session, SessionError> {
        let snapshot = serde_json::to_string(&user)?;
        let mut inner = self.lock();
        self.storage.write(TOKEN_KEY, token.expose_secret())?;
        if let Err(error) = self.storage.write(USER_KEY, &snapshot) {
            if let Err(cleanup) = self.storage.remove(TOKEN_KEY) {
                warn!(event_name = "session.storage_cleanup_failed", error = %cleanup, "could not remove orphaned token");
            }
            return Err(error);
        }

        inner.generation += 1;
        let session = Session { token, user, generation: inner.generation };
        inner.state = SessionState::Authenticated(session.clone());
        info!(event_name = "session.signed_in", user_id = %session.user.id, "signed in");
        self.publish(SessionEvent::SignedIn { user_id: session.user.id.clone() });
        Ok(session)
    }

    /// Replaces the user snapshot of the live session. Returns false when no
    /// session is active or the snapshot belongs to someone else.
    pub fn refresh_user(&self, user: User) -> Result<bool, SessionError> {
        let mut inner = self.lock();
        let SessionState::Authenticated(session) = &mut inner.state else {
            return Ok(false);
        };
        if session.user.id != user.id {
            return Ok(false);
        }
        self.storage.write(USER_KEY, &serde_json::to_string(&user)?)?;
        session.user = user;
        Ok(true)
    }

    pub fn logout(&self) {
        let mut inner = self.lock();
        self.clear_storage();
        let was_authenticated = inner.state.is_authenticated();
        inner.state = SessionState::Unauthenticated;
        if was_authenticated {
            info!(event_name = "session.signed_out", "signed out");
            self.publish(SessionEvent::SignedOut);
        }
    }

    /// Tears down the session that issued a request which came back 401.
    /// Only the first caller for a given generation wins.
    pub fn expire(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        let live = matches!(
            &inner.state,
            SessionState::Authenticated(session) if session.generation == generation
        );
        if !live {
            return false;
        }
        self.clear_storage();
        inner.state = SessionState::Unauthenticated;
        warn!(event_name = "session.expired", generation, "session rejected by the server");
        self.publish(SessionEvent::Expired { generation });
        true
    }
}
