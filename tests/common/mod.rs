//! Common test utilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::mpsc;

use flowline::api::{StreamEvent, StreamRequest};
use flowline::engine::{
    EngineError, EngineOutput, EngineState, EngineStream, RunConfig, StepChunk, WorkflowEngine,
};
use flowline::session::SessionOrchestrator;
use flowline::trace::{SpanOutcome, TraceBackend, TraceReporter};
use flowline::turns::InMemoryTurnManager;

// ============================================================================
// Fake Engine
// ============================================================================

/// One scripted engine run.
pub enum Script {
    /// Emit these items, then end the stream.
    Items(Vec<Result<EngineOutput, EngineError>>),
    /// Emit these items, then hang until the subscription is cancelled.
    ItemsThenHang(Vec<Result<EngineOutput, EngineError>>),
}

/// A workflow engine driven by pre-scripted output streams.
#[derive(Default)]
pub struct FakeEngine {
    scripts: Mutex<VecDeque<Script>>,
    /// Error message returned by `update_state`, when set.
    pub reject_update: Mutex<Option<String>>,
    pub stream_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    /// Terminal state returned by `invoke`.
    pub invoke_state: Mutex<Option<EngineState>>,
    /// Seed states observed by `stream`, in call order.
    pub seen_states: Mutex<Vec<Option<EngineState>>>,
    /// Updates observed by `update_state`, in call order.
    pub seen_updates: Mutex<Vec<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn stream_call_count(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn invoke(
        &self,
        _state: EngineState,
        _config: RunConfig,
    ) -> Result<EngineState, EngineError> {
        Ok(self
            .invoke_state
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default())
    }

    async fn stream(
        &self,
        state: Option<EngineState>,
        _config: RunConfig,
    ) -> Result<EngineStream, EngineError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_states.lock().unwrap().push(state);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Items(Vec::new()));
        Ok(match script {
            Script::Items(items) => Box::pin(stream::iter(items)),
            Script::ItemsThenHang(items) => Box::pin(async_stream::stream! {
                for item in items {
                    yield item;
                }
                futures::future::pending::<()>().await;
            }),
        })
    }

    async fn update_state(
        &self,
        config: RunConfig,
        update: EngineState,
    ) -> Result<RunConfig, EngineError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_updates.lock().unwrap().push(update);
        if let Some(message) = self.reject_update.lock().unwrap().clone() {
            return Err(EngineError::UpdateRejected(message));
        }
        Ok(config)
    }
}

/// A chunk item for scripting.
pub fn chunk(node: &str, text: &str) -> Result<EngineOutput, EngineError> {
    Ok(EngineOutput::Chunk(StepChunk {
        node: node.to_string(),
        chunk: text.to_string(),
    }))
}

// ============================================================================
// Recording Trace Backend
// ============================================================================

/// Trace backend that records every span start and end.
#[derive(Default)]
pub struct RecordingBackend {
    pub started: Mutex<Vec<String>>,
    pub ended: Mutex<Vec<(String, SpanOutcome)>>,
}

impl TraceBackend for RecordingBackend {
    fn start_span(&self, session_id: &str, _: &str, _: &str) -> Result<String, String> {
        self.started.lock().unwrap().push(session_id.to_string());
        Ok(format!("span-{session_id}"))
    }

    fn end_span(&self, span_id: &str, outcome: &SpanOutcome) {
        self.ended
            .lock()
            .unwrap()
            .push((span_id.to_string(), outcome.clone()));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub backend: Arc<RecordingBackend>,
    pub reporter: TraceReporter,
    pub orchestrator: SessionOrchestrator,
}

/// Build an orchestrator over a fake engine and a recording trace backend.
pub fn harness() -> Harness {
    let engine = Arc::new(FakeEngine::new());
    let backend = Arc::new(RecordingBackend::default());
    let reporter = TraceReporter::new(backend.clone());
    let orchestrator = SessionOrchestrator::new(
        engine.clone(),
        Arc::new(InMemoryTurnManager::new(5)),
        reporter.clone(),
    );
    Harness {
        engine,
        backend,
        reporter,
        orchestrator,
    }
}

/// A fresh-run request for the given session/query.
pub fn request(session_id: &str, query: &str) -> StreamRequest {
    StreamRequest {
        session_id: Some(session_id.to_string()),
        agent_id: "test-agent".to_string(),
        query: query.to_string(),
        ..Default::default()
    }
}

/// Collect events until the channel closes or the timeout elapses.
pub async fn drain_events(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => return events,
        }
    }
}

/// Poll a condition until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}
