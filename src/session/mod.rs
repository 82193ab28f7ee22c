//! Streamed session management.
//!
//! A session ties one workflow run to one subscriber: the registry tracks
//! live sessions, the context holds per-session streaming state, the sink
//! delivers events, and the orchestrator drives the lifecycle.

mod context;
mod error;
mod orchestrator;
mod registry;
mod sink;

pub use context::StreamSession;
pub use error::{OrchestratorError, Result};
pub use orchestrator::SessionOrchestrator;
pub use registry::SessionRegistry;
pub use sink::EventSink;
