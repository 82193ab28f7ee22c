//! Session registry.
//!
//! The registry is the single source of truth for which sessions are live.
//! Terminal transitions race each other by removing the entry: removal is
//! atomic, so exactly one path takes ownership of the session and runs its
//! finalization.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::context::StreamSession;

/// Registry of live streaming sessions.
///
/// Thread-safe and cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<StreamSession>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an existing session or register a fresh one.
    ///
    /// The entry API makes the lookup-or-insert atomic, so two concurrent
    /// requests for the same id share one session.
    pub fn get_or_create(&self, id: &str, agent_id: &str) -> Arc<StreamSession> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, agent_id = %agent_id, "registering session");
                Arc::new(StreamSession::new(id, agent_id))
            })
            .clone()
    }

    /// Get a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.get(id).map(|r| r.clone())
    }

    /// Remove a session, returning it when this caller won the removal.
    ///
    /// This is the terminal-transition race: concurrent removers of the
    /// same id see the session exactly once between them.
    pub fn remove(&self, id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Get the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
