//! Orchestrator error types.

use thiserror::Error;

use crate::engine::EngineError;

/// Errors returned on the request path, before streaming begins.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request is malformed (blank query, blank agent id, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A resume named a session id that is not registered.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The engine failed before any output was produced.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
