use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{now_epoch_secs, Session, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

/// A session handle: the per-session mutex the request processor holds for
/// the life of one request, guarding that session's `Session` value.
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub async fn lock(&self) -> OwnedMutexGuard<Session> {
        self.inner.clone().lock_owned().await
    }
}

/// `get | getOrCreate | update | list | sweep`, backed by a concurrent map
/// keyed by session id (4.D). The map's own lock is only ever held for a
/// lookup/insert; the returned `SessionHandle` carries its own mutex so a
/// request can hold a session locked for its full duration without blocking
/// lookups against other sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get(&self, id: &SessionId) -> Option<SessionHandle>;
    async fn get_or_create(&self, id: SessionId) -> SessionHandle;
    async fn list(&self) -> Vec<SessionId>;
    /// Evicts sessions whose `last_activity + ttl_secs < now`. Must not touch
    /// a session whose mutex is currently held (in-flight request).
    async fn sweep(&self, ttl_secs: u64);
}

pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        InMemorySessionStore {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|inner| SessionHandle { inner: inner.clone() })
    }

    async fn get_or_create(&self, id: SessionId) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        let inner = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id))))
            .clone();
        SessionHandle { inner }
    }

    async fn list(&self) -> Vec<SessionId> {
        let sessions = self.sessions.lock().await;
        sessions.keys().cloned().collect()
    }

    async fn sweep(&self, ttl_secs: u64) {
        let now = now_epoch_secs();
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, inner| {
            // try_lock: an in-flight request holds this mutex, so eviction
            // must not interrupt it — skip sessions currently locked.
            match inner.try_lock() {
                Ok(session) => session.last_activity + ttl_secs >= now,
                Err(_) => true,
            }
        });
    }
}
