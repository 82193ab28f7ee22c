//! Shared API types used by the server handlers and embedding hosts.
//!
//! These types define the contract between the orchestrator and the
//! transport layer. Changes here affect both sides, preventing silent drift.

use serde::{Deserialize, Serialize};

use crate::classify::ChunkKind;

// ============================================================================
// ID Prefixes
// ============================================================================

/// ID prefix for generated session ids.
pub const SESSION_ID_PREFIX: &str = "session_";

// ============================================================================
// SSE Event Names
// ============================================================================

/// SSE event type names used on the streaming endpoint.
pub mod sse {
    pub const CONTENT: &str = "content";
    pub const ERROR: &str = "error";
    pub const COMPLETE: &str = "complete";
}

// ============================================================================
// Stream Request
// ============================================================================

/// Request to start a new workflow run or resume one awaiting feedback.
///
/// A request with `feedback_content` set resumes an interrupted session;
/// anything else starts a fresh run. A blank `session_id` gets a generated
/// one on the fresh path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Session to operate on. Generated when absent or blank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Target agent id.
    pub agent_id: String,
    /// The user's query text.
    #[serde(default)]
    pub query: String,
    /// Human feedback on a proposed plan. Presence selects the resume path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_content: Option<String>,
    /// Whether the feedback rejects the proposed plan.
    #[serde(default)]
    pub rejected_plan: bool,
    /// Run the workflow for structured output only (no narration steps).
    #[serde(default)]
    pub structured_only: bool,
    /// Pause the workflow for human review before executing the plan.
    #[serde(default)]
    pub human_review: bool,
}

impl StreamRequest {
    /// Whether this request resumes an interrupted session.
    #[must_use]
    pub fn is_feedback(&self) -> bool {
        self.feedback_content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

// ============================================================================
// Stream Events
// ============================================================================

/// One event delivered to the client sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A visible chunk of workflow output.
    Content {
        session_id: String,
        agent_id: String,
        /// Name of the workflow node that produced the chunk.
        node: String,
        text: String,
        classification: ChunkKind,
    },
    /// The run failed; no further events follow.
    Error {
        session_id: String,
        agent_id: String,
        message: String,
    },
    /// The run completed; no further events follow.
    Complete { session_id: String, agent_id: String },
}

impl StreamEvent {
    /// The SSE event name for this event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => sse::CONTENT,
            StreamEvent::Error { .. } => sse::ERROR,
            StreamEvent::Complete { .. } => sse::COMPLETE,
        }
    }
}
