//! Session orchestration.
//!
//! The orchestrator owns the full lifecycle of a streamed run: request
//! validation, session registration, the subscription task that drains the
//! engine's output, chunk routing to the subscriber, and the terminal
//! transitions (complete, error, stop) that race each other by removing
//! the session from the registry.

use std::sync::Arc;

use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::api::{SESSION_ID_PREFIX, StreamEvent, StreamRequest};
use crate::background::BackgroundTasks;
use crate::classify::classify;
use crate::engine::{
    EngineOutput, EngineState, FeedbackData, PLANNER_NODE, RunConfig, StepChunk, WorkflowEngine,
    keys,
};
use crate::trace::TraceReporter;
use crate::turns::TurnManager;

use super::context::StreamSession;
use super::error::{OrchestratorError, Result};
use super::registry::SessionRegistry;
use super::sink::EventSink;

/// Drives streamed workflow sessions end to end.
///
/// Cheap to clone; all state lives behind shared handles.
#[derive(Clone)]
pub struct SessionOrchestrator {
    engine: Arc<dyn WorkflowEngine>,
    registry: SessionRegistry,
    turns: Arc<dyn TurnManager>,
    reporter: TraceReporter,
    tasks: BackgroundTasks,
}

impl SessionOrchestrator {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        turns: Arc<dyn TurnManager>,
        reporter: TraceReporter,
    ) -> Self {
        Self {
            engine,
            registry: SessionRegistry::new(),
            turns,
            reporter,
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Wait for all subscription tasks to finish. Called on shutdown.
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }

    // ------------------------------------------------------------------------
    // Entry Points
    // ------------------------------------------------------------------------

    /// Begin streaming for a request, delivering events through `sink`.
    ///
    /// A request carrying feedback resumes the named interrupted session;
    /// anything else starts a fresh run. Returns the session id events will
    /// be tagged with.
    pub async fn start_or_resume(&self, request: StreamRequest, sink: EventSink) -> Result<String> {
        if request.agent_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "agent_id must not be blank".to_string(),
            ));
        }

        if request.is_feedback() {
            self.resume(request, sink).await
        } else {
            self.start(request, sink).await
        }
    }

    /// Stop a session, finalizing it as if the stream had completed.
    ///
    /// Stopping a blank or unknown id is a no-op: the session already lost
    /// (or never entered) the terminal race.
    pub fn stop(&self, session_id: &str) {
        if session_id.trim().is_empty() {
            return;
        }
        if let Err(err) = self.turns.discard_pending(session_id) {
            warn!(session_id = %session_id, error = %err, "failed to discard pending turn");
        }
        let Some(session) = self.registry.remove(session_id) else {
            debug!(session_id = %session_id, "stop for unknown session ignored");
            return;
        };
        info!(session_id = %session_id, "session stopped");
        self.finalize_success(&session);
    }

    /// Run the workflow to completion for its structured output alone.
    ///
    /// No session is registered and nothing streams; the terminal state's
    /// plan output is returned directly.
    pub async fn structured_query(&self, request: StreamRequest) -> Result<serde_json::Value> {
        if request.agent_id.trim().is_empty() || request.query.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "agent_id and query must not be blank".to_string(),
            ));
        }

        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_session_id);
        let state = seed_state(&request.query, &request.agent_id, &session_id, "", true, false);
        let terminal = self
            .engine
            .invoke(state, RunConfig::new(session_id))
            .await?;
        Ok(terminal
            .get(keys::PLAN_OUTPUT)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    // ------------------------------------------------------------------------
    // Fresh Start
    // ------------------------------------------------------------------------

    async fn start(&self, request: StreamRequest, sink: EventSink) -> Result<String> {
        if request.query.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "query must not be blank".to_string(),
            ));
        }

        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_session_id);
        let session = self.registry.get_or_create(&session_id, &request.agent_id);
        if !session.set_sink(sink) {
            // Cleaned but not yet evicted: the terminal race owns it. Skip
            // without starting a run; the dropped sink ends the stream.
            info!(session_id = %session_id, "session already cleaned, skipping start");
            return Ok(session_id);
        }

        let span = self
            .reporter
            .start_span(&session_id, &request.agent_id, &request.query);
        session.set_span(span);

        let turn_context = match self.turns.build_context(&session_id) {
            Ok(context) => context,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to build turn context");
                String::new()
            }
        };
        if let Err(err) = self.turns.begin_turn(&session_id, &request.query) {
            warn!(session_id = %session_id, error = %err, "failed to begin turn");
        }

        // Review only makes sense when the plan will actually execute.
        let review = request.human_review && !request.structured_only;
        let state = seed_state(
            &request.query,
            &request.agent_id,
            &session_id,
            &turn_context,
            request.structured_only,
            review,
        );

        info!(
            session_id = %session_id,
            agent_id = %request.agent_id,
            human_review = review,
            "session started"
        );
        self.subscribe(session, Some(state), RunConfig::new(&session_id));
        Ok(session_id)
    }

    // ------------------------------------------------------------------------
    // Resume
    // ------------------------------------------------------------------------

    async fn resume(&self, request: StreamRequest, sink: EventSink) -> Result<String> {
        let session_id = request
            .session_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::InvalidRequest(
                    "feedback requires a session_id".to_string(),
                )
            })?
            .to_string();

        let session = self
            .registry
            .get(&session_id)
            .filter(|session| !session.is_cleaned())
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.clone()))?;
        if !session.is_interrupted() {
            return Err(OrchestratorError::InvalidRequest(
                "session is not awaiting feedback".to_string(),
            ));
        }

        let feedback = FeedbackData {
            approved: !request.rejected_plan,
            content: request.feedback_content.clone().unwrap_or_default(),
        };
        if request.rejected_plan {
            if let Err(err) = self.turns.restart_last_turn(&session_id) {
                warn!(session_id = %session_id, error = %err, "failed to restart turn");
            }
        }

        // Rebuilt after the rollback so a rejected plan is gone from the
        // context the engine resumes with.
        let turn_context = match self.turns.build_context(&session_id) {
            Ok(context) => context,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to rebuild turn context");
                String::new()
            }
        };

        // The state update must land before this session is touched, so a
        // rejected update leaves it resumable.
        let config = RunConfig::new(&session_id)
            .with_metadata(keys::HUMAN_FEEDBACK, json!(feedback));
        let mut update = EngineState::new();
        update.insert(keys::HUMAN_FEEDBACK.to_string(), json!(feedback));
        update.insert(keys::TURN_CONTEXT.to_string(), json!(turn_context));
        let resume_config = self.engine.update_state(config, update).await?;

        if !session.set_sink(sink) {
            return Err(OrchestratorError::SessionNotFound(session_id));
        }
        session.set_interrupted(false);
        let span = self
            .reporter
            .start_span(&session_id, session.agent_id(), &feedback.content);
        session.set_span(span);

        info!(
            session_id = %session_id,
            approved = feedback.approved,
            "session resumed with feedback"
        );
        self.subscribe(session, None, resume_config);
        Ok(session_id)
    }

    // ------------------------------------------------------------------------
    // Subscription Task
    // ------------------------------------------------------------------------

    /// Spawn the task that drains the engine stream for a session.
    ///
    /// Opening the stream happens inside the task so engine failures route
    /// through the terminal error transition rather than the request path.
    fn subscribe(&self, session: Arc<StreamSession>, state: Option<EngineState>, config: RunConfig) {
        let this = self.clone();
        self.tasks.spawn(async move {
            if session.is_cleaned() {
                return;
            }

            let mut stream = match this.engine.stream(state, config).await {
                Ok(stream) => stream,
                Err(err) => {
                    this.handle_stream_error(session.id(), &err.to_string());
                    return;
                }
            };

            let token = CancellationToken::new();
            if !session.try_attach(token.clone()) {
                // Cleanup won the race; the run never observably started.
                token.cancel();
                return;
            }

            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    item = stream.next() => match item {
                        Some(Ok(EngineOutput::Chunk(chunk))) => {
                            if !this.route_chunk(session.id(), chunk) {
                                return;
                            }
                        }
                        Some(Ok(EngineOutput::Snapshot(_))) => {}
                        Some(Ok(EngineOutput::Interrupted)) => {
                            session.set_interrupted(true);
                        }
                        Some(Err(err)) => {
                            this.handle_stream_error(session.id(), &err.to_string());
                            return;
                        }
                        None => {
                            if session.is_interrupted() {
                                debug!(session_id = %session.id(), "run interrupted, awaiting feedback");
                                if let Some(span) = session.span() {
                                    this.reporter.end_span_success(
                                        &span,
                                        session.id(),
                                        &session.output(),
                                    );
                                }
                                session.detach();
                            } else {
                                this.handle_stream_complete(session.id());
                            }
                            return;
                        }
                    },
                }
            }
        });
    }

    // ------------------------------------------------------------------------
    // Chunk Routing
    // ------------------------------------------------------------------------

    /// Route one chunk to the session's subscriber.
    ///
    /// Returns false when the subscription task should stop. A chunk for a
    /// session no longer in the registry is dropped silently: a terminal
    /// transition already owns that session.
    fn route_chunk(&self, session_id: &str, chunk: StepChunk) -> bool {
        let Some(session) = self.registry.get(session_id) else {
            return false;
        };
        if chunk.chunk.is_empty() {
            return true;
        }

        let (kind, marker_only) = classify(session.classification(), &chunk.chunk);
        session.set_classification(kind);
        if marker_only {
            return true;
        }

        session.append_output(&chunk.chunk);
        if chunk.node == PLANNER_NODE {
            if let Err(err) = self.turns.append_chunk(session_id, &chunk.chunk) {
                warn!(session_id = %session_id, error = %err, "failed to record plan chunk");
            }
        }

        let delivered = session.sink().is_some_and(|sink| {
            sink.try_emit(StreamEvent::Content {
                session_id: session_id.to_string(),
                agent_id: session.agent_id().to_string(),
                node: chunk.node,
                text: chunk.chunk,
                classification: kind,
            })
        });
        if !delivered {
            // Subscriber is gone or stalled; tear the session down.
            info!(session_id = %session_id, "subscriber lost, stopping session");
            if let Some(sink) = session.sink() {
                if sink.has_subscribers() {
                    let _ = sink.try_emit(StreamEvent::Error {
                        session_id: session_id.to_string(),
                        agent_id: session.agent_id().to_string(),
                        message: "event delivery failed".to_string(),
                    });
                }
            }
            self.stop(session_id);
            return false;
        }
        true
    }

    // ------------------------------------------------------------------------
    // Terminal Transitions
    // ------------------------------------------------------------------------

    fn handle_stream_complete(&self, session_id: &str) {
        if let Err(err) = self.turns.finish_turn(session_id) {
            warn!(session_id = %session_id, error = %err, "failed to finish turn");
        }
        let Some(session) = self.registry.remove(session_id) else {
            return;
        };
        info!(session_id = %session_id, "session completed");
        self.finalize_success(&session);
    }

    fn handle_stream_error(&self, session_id: &str, message: &str) {
        let Some(session) = self.registry.remove(session_id) else {
            return;
        };
        warn!(session_id = %session_id, error = %message, "session failed");

        if let Some(span) = session.span() {
            self.reporter.end_span_error(&span, session_id, message);
        }
        if let Some(sink) = session.sink() {
            // Best effort; the subscriber may already be gone.
            let _ = sink.try_emit(StreamEvent::Error {
                session_id: session_id.to_string(),
                agent_id: session.agent_id().to_string(),
                message: message.to_string(),
            });
        }
        session.cleanup();
    }

    /// Shared tail of the complete and stop transitions. The caller has
    /// already removed the session from the registry.
    fn finalize_success(&self, session: &StreamSession) {
        if let Some(span) = session.span() {
            self.reporter
                .end_span_success(&span, session.id(), &session.output());
        }
        if let Some(sink) = session.sink() {
            let _ = sink.try_emit(StreamEvent::Complete {
                session_id: session.id().to_string(),
                agent_id: session.agent_id().to_string(),
            });
        }
        session.cleanup();
    }
}

fn generate_session_id() -> String {
    format!("{}{}", SESSION_ID_PREFIX, Ulid::new())
}

fn seed_state(
    query: &str,
    agent_id: &str,
    session_id: &str,
    turn_context: &str,
    structured_only: bool,
    human_review: bool,
) -> EngineState {
    let mut state = EngineState::new();
    state.insert(keys::INPUT.to_string(), json!(query));
    state.insert(keys::AGENT_ID.to_string(), json!(agent_id));
    state.insert(keys::TRACE_SESSION_ID.to_string(), json!(session_id));
    state.insert(keys::TURN_CONTEXT.to_string(), json!(turn_context));
    state.insert(keys::STRUCTURED_ONLY.to_string(), json!(structured_only));
    state.insert(keys::HUMAN_REVIEW_ENABLED.to_string(), json!(human_review));
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_the_prefix() {
        let id = generate_session_id();
        assert!(id.starts_with(SESSION_ID_PREFIX));
        assert!(id.len() > SESSION_ID_PREFIX.len());
    }

    #[test]
    fn seed_state_flags() {
        let state = seed_state("q", "a", "s1", "ctx", false, true);
        assert_eq!(state[keys::INPUT], json!("q"));
        assert_eq!(state[keys::TURN_CONTEXT], json!("ctx"));
        assert_eq!(state[keys::STRUCTURED_ONLY], json!(false));
        assert_eq!(state[keys::HUMAN_REVIEW_ENABLED], json!(true));
    }
}
