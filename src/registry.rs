use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::DEFAULT_SESSION_ID;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    lock: Arc<Mutex<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<()>>>,
}

pub fn normalize_session_id(session_id: Option<&str>) -> String {
    session_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_or_create(&self, session_id: &str) -> SessionHandle {
        let lock = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "registering new session");
                Arc::new(Mutex::new(()))
            })
            .clone();
        SessionHandle {
            id: Arc::from(session_id),
            lock,
        }
    }

    // Only drops entries nobody holds.
    pub fn forget(&self, session_id: &str) -> bool {
        self.sessions
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
