//! Per-session streaming state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::ChunkKind;
use crate::trace::SpanHandle;

use super::sink::EventSink;

// std::sync::Mutex is correct here—lock is never held across .await points.
#[derive(Default)]
struct Inner {
    /// Cancellation token of the running subscription task, when attached.
    subscription: Option<CancellationToken>,
    /// Delivery channel to the current subscriber.
    sink: Option<EventSink>,
    /// Trace span open for the current run.
    span: Option<SpanHandle>,
    /// Sticky classification carried across chunks.
    classification: Option<ChunkKind>,
    /// Output text collected so far.
    output: String,
    /// Set when the engine suspended the run for human review.
    interrupted: bool,
}

/// State of one streamed session.
///
/// All mutation goes through the inner lock, and the cleaned flag gates it:
/// once a session is cleaned, nothing mutates it again. Cleanup itself is
/// guarded by a compare-and-set so exactly one caller performs it.
pub struct StreamSession {
    id: String,
    agent_id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
    cleaned: AtomicBool,
}

impl StreamSession {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            created_at: Utc::now(),
            inner: Mutex::new(Inner::default()),
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether cleanup has already run.
    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------------

    /// Attach the subscription task's cancellation token.
    ///
    /// Returns false when the session was cleaned before the task got here,
    /// in which case the caller must stop itself. The check and the attach
    /// are one critical section, so cleanup either sees the token and
    /// cancels it or refuses the attach.
    pub fn try_attach(&self, token: CancellationToken) -> bool {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if self.is_cleaned() {
            return false;
        }
        inner.subscription = Some(token);
        true
    }

    /// Drop the subscription token without cleaning the session.
    ///
    /// Used when a stream ends at an interrupt point: the session stays
    /// registered for resume, but no task is attached any more.
    pub fn detach(&self) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.subscription = None;
        inner.sink = None;
        inner.span = None;
    }

    // ------------------------------------------------------------------------
    // Delivery & Trace
    // ------------------------------------------------------------------------

    /// Point delivery at a new subscriber. Refused once cleaned.
    pub fn set_sink(&self, sink: EventSink) -> bool {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if self.is_cleaned() {
            return false;
        }
        inner.sink = Some(sink);
        true
    }

    pub fn sink(&self) -> Option<EventSink> {
        self.inner.lock().expect("mutex poisoned").sink.clone()
    }

    pub fn set_span(&self, span: SpanHandle) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if !self.is_cleaned() {
            inner.span = Some(span);
        }
    }

    pub fn span(&self) -> Option<SpanHandle> {
        self.inner.lock().expect("mutex poisoned").span.clone()
    }

    // ------------------------------------------------------------------------
    // Chunk State
    // ------------------------------------------------------------------------

    /// Current sticky classification, defaulting to plain text.
    pub fn classification(&self) -> Option<ChunkKind> {
        self.inner.lock().expect("mutex poisoned").classification
    }

    pub fn set_classification(&self, kind: ChunkKind) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if !self.is_cleaned() {
            inner.classification = Some(kind);
        }
    }

    /// Append delivered text to the session's collected output.
    pub fn append_output(&self, text: &str) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if !self.is_cleaned() {
            inner.output.push_str(text);
        }
    }

    pub fn output(&self) -> String {
        self.inner.lock().expect("mutex poisoned").output.clone()
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if !self.is_cleaned() {
            inner.interrupted = interrupted;
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.lock().expect("mutex poisoned").interrupted
    }

    // ------------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------------

    /// Release the session's resources exactly once.
    ///
    /// The first caller wins the compare-and-set, cancels any attached
    /// subscription, and drops the sink. Later callers observe a no-op.
    /// Returns true for the caller that performed the cleanup.
    pub fn cleanup(&self) -> bool {
        if self
            .cleaned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(session_id = %self.id, "cleanup already performed");
            return false;
        }

        let mut inner = self.inner.lock().expect("mutex poisoned");
        if let Some(token) = inner.subscription.take() {
            token.cancel();
        }
        inner.sink = None;
        inner.span = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_runs_once() {
        let session = StreamSession::new("s1", "agent");
        assert!(!session.is_cleaned());
        assert!(session.cleanup());
        assert!(session.is_cleaned());
        assert!(!session.cleanup());
    }

    #[test]
    fn cleanup_cancels_attached_subscription() {
        let session = StreamSession::new("s1", "agent");
        let token = CancellationToken::new();
        assert!(session.try_attach(token.clone()));
        assert!(!token.is_cancelled());

        session.cleanup();
        assert!(token.is_cancelled());
    }

    #[test]
    fn attach_refused_after_cleanup() {
        let session = StreamSession::new("s1", "agent");
        session.cleanup();

        let token = CancellationToken::new();
        assert!(!session.try_attach(token.clone()));
        // The caller cancels its own token on refusal; cleanup never saw it.
        assert!(!token.is_cancelled());
    }

    #[test]
    fn no_mutation_after_cleanup() {
        let session = StreamSession::new("s1", "agent");
        session.append_output("before ");
        session.cleanup();

        session.append_output("after");
        session.set_classification(ChunkKind::Sql);
        session.set_interrupted(true);

        assert_eq!(session.output(), "before ");
        assert_eq!(session.classification(), None);
        assert!(!session.is_interrupted());
    }

    #[test]
    fn detach_keeps_session_usable() {
        let session = StreamSession::new("s1", "agent");
        let token = CancellationToken::new();
        assert!(session.try_attach(token));
        session.set_interrupted(true);
        session.detach();

        assert!(!session.is_cleaned());
        assert!(session.is_interrupted());
        let token = CancellationToken::new();
        assert!(session.try_attach(token));
    }
}
