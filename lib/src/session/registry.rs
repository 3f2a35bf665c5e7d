// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Session registry
//!
//! Owns active sessions and broadcasts sessions as they are added. The
//! [sessions][SessionRegistry::sessions] stream replays every session added
//! so far to each new subscriber before continuing live. The replay history
//! does not own sessions, removed sessions that have since been dropped are
//! skipped.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, Weak},
    task::{Context, Poll},
};

use futures::{ready, Stream, StreamExt};
use log::{debug, warn};

use ledger_dmk_core::replay::{ReplayBus, ReplayPolicy, ReplayStream};

use super::{Session, SessionId};
use crate::Error;

/// Registry of active sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    added: ReplayBus<Weak<Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            added: ReplayBus::new(ReplayPolicy::All),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a session, ignoring sessions already registered
    pub fn add_session(&self, session: Arc<Session>) {
        let id = session.id();

        {
            let mut sessions = self.lock();
            if sessions.contains_key(&id) {
                warn!("Session {} already registered", id);
                return;
            }

            sessions.insert(id, session.clone());
        }

        debug!("Added session {} ({})", id, session.device_id());

        self.added.publish(Arc::downgrade(&session));
    }

    /// Remove and close a session, no-op for unknown sessions
    pub async fn remove_session(&self, id: SessionId) {
        let session = self.lock().remove(&id);

        match session {
            Some(s) => {
                debug!("Removing session {}", id);
                s.close().await;
            }
            None => debug!("Session {} not registered", id),
        }
    }

    /// Fetch a session by id
    pub fn get_session_by_id(&self, id: SessionId) -> Result<Arc<Session>, Error> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or(Error::SessionNotFound(id))
    }

    /// Fetch sessions for a device
    pub fn get_sessions_by_device_id(&self, device_id: &str) -> Result<Vec<Arc<Session>>, Error> {
        let sessions: Vec<_> = self
            .lock()
            .values()
            .filter(|s| s.device_id() == device_id)
            .cloned()
            .collect();

        match sessions.is_empty() {
            true => Err(Error::DeviceNotFound(device_id.to_string())),
            false => Ok(sessions),
        }
    }

    /// Fetch all active sessions
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    /// Stream of added sessions, replaying sessions added so far
    pub fn sessions(&self) -> SessionStream {
        SessionStream {
            inner: self.added.subscribe(),
        }
    }

    /// Close and remove all sessions
    pub async fn close(&self) {
        let sessions: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();

        for s in sessions {
            s.close().await;
        }

        self.added.close();
    }
}

/// Stream of sessions added to a [SessionRegistry]
pub struct SessionStream {
    inner: ReplayStream<Weak<Session>>,
}

impl Stream for SessionStream {
    type Item = Arc<Session>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(w) => {
                    if let Some(s) = w.upgrade() {
                        return Poll::Ready(Some(s));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
