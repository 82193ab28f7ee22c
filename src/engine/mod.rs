//! The workflow engine seam.
//!
//! Flowline does not execute workflows itself; the host service implements
//! [`WorkflowEngine`] over its compiled graph. The orchestrator only consumes
//! start/resume/update operations and the resulting output stream.

mod error;

pub use error::EngineError;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// State Keys
// ============================================================================

/// Well-known keys in the engine's overall state.
pub mod keys {
    /// The user's query text.
    pub const INPUT: &str = "input";
    /// Target agent id.
    pub const AGENT_ID: &str = "agent_id";
    /// Run the workflow for structured output only.
    pub const STRUCTURED_ONLY: &str = "structured_only";
    /// Pause before the plan executes so a human can review it.
    pub const HUMAN_REVIEW_ENABLED: &str = "human_review_enabled";
    /// Accumulated multi-turn context text.
    pub const TURN_CONTEXT: &str = "turn_context";
    /// Session id propagated for trace correlation.
    pub const TRACE_SESSION_ID: &str = "trace_session_id";
    /// Final structured output of the plan-producing step.
    pub const PLAN_OUTPUT: &str = "plan_output";
    /// Human feedback payload attached to resume configs.
    pub const HUMAN_FEEDBACK: &str = "human_feedback";
}

/// Name of the plan-producing workflow node. Chunks from this node are also
/// forwarded to the multi-turn context manager.
pub const PLANNER_NODE: &str = "Planner";

// ============================================================================
// State & Config
// ============================================================================

/// The engine's overall state: an open key/value map.
pub type EngineState = serde_json::Map<String, Value>;

/// Per-run configuration handed to the engine.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Session the run belongs to.
    pub session_id: String,
    /// Out-of-band metadata (e.g. human feedback on resume).
    pub metadata: HashMap<String, Value>,
}

impl RunConfig {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry, consuming and returning the config.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Human feedback carried as resume metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackData {
    /// False when the reviewed plan was rejected.
    #[serde(rename = "feedback")]
    pub approved: bool,
    #[serde(rename = "feedback_content")]
    pub content: String,
}

// ============================================================================
// Outputs
// ============================================================================

/// Token usage reported by a model-backed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A routable chunk of streamed step output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepChunk {
    /// Name of the node that emitted the chunk.
    pub node: String,
    /// The text fragment.
    pub chunk: String,
}

/// One item of the engine's output stream.
#[derive(Debug, Clone)]
pub enum EngineOutput {
    /// A streamed text chunk; the only kind the orchestrator routes.
    Chunk(StepChunk),
    /// A step's folded result merged into the overall state. Not routed.
    Snapshot(EngineState),
    /// The run suspended for human review; the stream ends after this item
    /// and the session stays registered awaiting feedback.
    Interrupted,
}

/// The engine's asynchronous output sequence.
pub type EngineStream = Pin<Box<dyn Stream<Item = Result<EngineOutput, EngineError>> + Send>>;

// ============================================================================
// WorkflowEngine Trait
// ============================================================================

/// The external workflow engine consumed by the orchestrator.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Run the workflow to completion and return the terminal state.
    ///
    /// Blocking convenience path used for structured-output-only queries.
    async fn invoke(&self, state: EngineState, config: RunConfig)
        -> Result<EngineState, EngineError>;

    /// Start a run (with an initial state) or continue from an interrupt
    /// point (state `None`), producing an output stream.
    async fn stream(
        &self,
        state: Option<EngineState>,
        config: RunConfig,
    ) -> Result<EngineStream, EngineError>;

    /// Apply a partial state update ahead of a resume, returning the config
    /// to resume with. Rejection is fatal for the resume.
    async fn update_state(
        &self,
        config: RunConfig,
        update: EngineState,
    ) -> Result<RunConfig, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_data_wire_names() {
        let data = FeedbackData {
            approved: false,
            content: "use a join".to_string(),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"feedback\":false"));
        assert!(json.contains("\"feedback_content\":\"use a join\""));
    }

    #[test]
    fn run_config_metadata_builder() {
        let config = RunConfig::new("session_1")
            .with_metadata(keys::HUMAN_FEEDBACK, serde_json::json!({"feedback": true}));
        assert_eq!(config.session_id, "session_1");
        assert!(config.metadata.contains_key(keys::HUMAN_FEEDBACK));
    }
}
