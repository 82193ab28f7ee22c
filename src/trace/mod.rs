//! Session tracing.
//!
//! Every streamed session is wrapped in a trace span carrying the query,
//! the collected output, and token totals accumulated while the stream ran.
//! The backend seam keeps the orchestrator independent of any particular
//! telemetry exporter; the default backend renders spans as structured logs.

mod ledger;

pub use ledger::{TokenLedger, TokenTotals};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::engine::Usage;

// ============================================================================
// Backend Seam
// ============================================================================

/// Attributes recorded when a span ends.
#[derive(Debug, Clone, Default)]
pub struct SpanOutcome {
    /// Collected output text, or an error description.
    pub output: String,
    /// True when the session ended with a stream error.
    pub is_error: bool,
    /// Token totals accumulated over the span's lifetime.
    pub tokens: TokenTotals,
}

/// Destination for session spans.
pub trait TraceBackend: Send + Sync {
    /// Open a span for a session. Returns an opaque backend span id.
    fn start_span(&self, session_id: &str, agent_id: &str, query: &str) -> Result<String, String>;

    /// Close a span previously opened with [`TraceBackend::start_span`].
    fn end_span(&self, span_id: &str, outcome: &SpanOutcome);
}

/// Default backend: spans become structured log events.
#[derive(Debug, Default)]
pub struct LogBackend;

impl TraceBackend for LogBackend {
    fn start_span(&self, session_id: &str, agent_id: &str, query: &str) -> Result<String, String> {
        info!(
            session_id = %session_id,
            agent_id = %agent_id,
            query = %query,
            "session span started"
        );
        Ok(session_id.to_string())
    }

    fn end_span(&self, span_id: &str, outcome: &SpanOutcome) {
        info!(
            span_id = %span_id,
            is_error = outcome.is_error,
            output_len = outcome.output.len(),
            prompt_tokens = outcome.tokens.prompt,
            completion_tokens = outcome.tokens.completion,
            "session span ended"
        );
    }
}

// ============================================================================
// Span Handle
// ============================================================================

/// Handle to an open session span.
///
/// Ends at most once, including across clones: the ended flag is shared, so
/// whichever holder ends the span first wins and later ends are no-ops. A
/// handle whose open failed is inert and every operation on it is a no-op.
#[derive(Debug, Clone)]
pub struct SpanHandle {
    span_id: Option<String>,
    ended: Arc<AtomicBool>,
}

impl SpanHandle {
    /// A handle that records nothing.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            span_id: None,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.span_id.is_some() && !self.ended.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Reporter
// ============================================================================

/// Fail-soft facade over the trace backend and the token ledger.
///
/// Trace failures never disturb the session they describe: a failed span
/// open yields an inert handle and the stream proceeds untraced.
#[derive(Clone)]
pub struct TraceReporter {
    backend: Arc<dyn TraceBackend>,
    ledger: Arc<TokenLedger>,
}

impl TraceReporter {
    pub fn new(backend: Arc<dyn TraceBackend>) -> Self {
        Self {
            backend,
            ledger: Arc::new(TokenLedger::new()),
        }
    }

    /// Open a span for a session and initialize its token bucket.
    ///
    /// Never fails; a backend error is logged and an inert handle returned.
    pub fn start_span(&self, session_id: &str, agent_id: &str, query: &str) -> SpanHandle {
        match self.backend.start_span(session_id, agent_id, query) {
            Ok(span_id) => {
                self.ledger.init(session_id);
                SpanHandle {
                    span_id: Some(span_id),
                    ended: Arc::new(AtomicBool::new(false)),
                }
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to start session span");
                SpanHandle::inert()
            }
        }
    }

    /// Add step usage to the session's token bucket.
    ///
    /// Dropped silently when the session has no bucket (span never opened,
    /// or totals already flushed by a span end).
    pub fn accumulate_tokens(&self, session_id: &str, usage: Usage) {
        self.ledger.add(session_id, usage);
    }

    /// End a span successfully, flushing the session's token totals.
    pub fn end_span_success(&self, handle: &SpanHandle, session_id: &str, output: &str) {
        self.end_span(handle, session_id, output, false);
    }

    /// End a span with an error description, flushing the token totals.
    pub fn end_span_error(&self, handle: &SpanHandle, session_id: &str, message: &str) {
        self.end_span(handle, session_id, message, true);
    }

    fn end_span(&self, handle: &SpanHandle, session_id: &str, output: &str, is_error: bool) {
        let Some(span_id) = handle.span_id.as_deref() else {
            return;
        };
        // The first end wins; every later end, via any clone, is a no-op.
        if handle.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let tokens = self.ledger.take(session_id).unwrap_or_default();
        let outcome = SpanOutcome {
            output: output.to_string(),
            is_error,
            tokens,
        };
        self.backend.end_span(span_id, &outcome);
    }
}
