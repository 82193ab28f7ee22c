//! Workflow engine error types.

use thiserror::Error;

/// Errors surfaced by a workflow engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the run's input or configuration.
    #[error("invalid run: {0}")]
    InvalidRun(String),

    /// A workflow step failed while executing.
    #[error("step '{node}' failed: {message}")]
    Step { node: String, message: String },

    /// A state update ahead of a resume was rejected.
    #[error("state update rejected: {0}")]
    UpdateRejected(String),

    /// Anything else the engine could not recover from.
    #[error("engine failure: {0}")]
    Internal(String),
}
