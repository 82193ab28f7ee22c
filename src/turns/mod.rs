//! Multi-turn conversation context.
//!
//! Sessions that span several queries carry the recent turns back into the
//! engine as context text. The manager seam lets the host back this with a
//! database; the in-memory implementation bounds history per session.

use dashmap::DashMap;
use thiserror::Error;

use crate::engine::PLANNER_NODE;

/// Errors from the turn context store.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn store unavailable: {0}")]
    Unavailable(String),
}

/// One completed or in-flight query/plan exchange.
#[derive(Debug, Clone, Default)]
struct Turn {
    query: String,
    plan: String,
}

/// Store of recent turns per session.
///
/// Failures here degrade the conversation context, never the stream, so
/// callers log and continue on error.
pub trait TurnManager: Send + Sync {
    /// Render preceding turns as context text for a new query.
    fn build_context(&self, session_id: &str) -> Result<String, TurnError>;

    /// Open a turn for a new query.
    fn begin_turn(&self, session_id: &str, query: &str) -> Result<(), TurnError>;

    /// Append plan text streamed for the current turn.
    fn append_chunk(&self, session_id: &str, chunk: &str) -> Result<(), TurnError>;

    /// Mark the current turn complete.
    fn finish_turn(&self, session_id: &str) -> Result<(), TurnError>;

    /// Drop the in-flight turn without recording it.
    fn discard_pending(&self, session_id: &str) -> Result<(), TurnError>;

    /// Clear the current turn's plan text, keeping its query, so a rejected
    /// plan can be regenerated against the same question.
    fn restart_last_turn(&self, session_id: &str) -> Result<(), TurnError>;
}

/// Turn history kept in process memory.
///
/// Per-session history is bounded, but entries for distinct session ids
/// accumulate until [`InMemoryTurnManager::evict`] drops them. Long-lived
/// hosts wanting durable or bounded conversations should supply their own
/// backed [`TurnManager`].
#[derive(Debug)]
pub struct InMemoryTurnManager {
    history: DashMap<String, Vec<Turn>>,
    max_turns: usize,
}

impl InMemoryTurnManager {
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            history: DashMap::new(),
            max_turns,
        }
    }

    /// Drop all history for a session, e.g. when the conversation ends.
    pub fn evict(&self, session_id: &str) {
        self.history.remove(session_id);
    }
}

impl TurnManager for InMemoryTurnManager {
    fn build_context(&self, session_id: &str) -> Result<String, TurnError> {
        let Some(turns) = self.history.get(session_id) else {
            return Ok(String::new());
        };
        let mut context = String::new();
        for turn in turns.iter() {
            if turn.plan.is_empty() {
                continue;
            }
            context.push_str(&format!(
                "user: {}\n{PLANNER_NODE}: {}\n",
                turn.query, turn.plan
            ));
        }
        Ok(context)
    }

    fn begin_turn(&self, session_id: &str, query: &str) -> Result<(), TurnError> {
        let mut turns = self.history.entry(session_id.to_string()).or_default();
        turns.push(Turn {
            query: query.to_string(),
            plan: String::new(),
        });
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }
        Ok(())
    }

    fn append_chunk(&self, session_id: &str, chunk: &str) -> Result<(), TurnError> {
        if let Some(mut turns) = self.history.get_mut(session_id) {
            if let Some(turn) = turns.last_mut() {
                turn.plan.push_str(chunk);
            }
        }
        Ok(())
    }

    fn finish_turn(&self, _session_id: &str) -> Result<(), TurnError> {
        Ok(())
    }

    fn discard_pending(&self, session_id: &str) -> Result<(), TurnError> {
        if let Some(mut turns) = self.history.get_mut(session_id) {
            turns.pop();
        }
        Ok(())
    }

    fn restart_last_turn(&self, session_id: &str) -> Result<(), TurnError> {
        if let Some(mut turns) = self.history.get_mut(session_id) {
            if let Some(turn) = turns.last_mut() {
                turn.plan.clear();
            }
        }
        Ok(())
    }
}
