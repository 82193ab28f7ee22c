//! Stream composition helpers.
//!
//! Engine implementations assemble their output from per-step streams.
//! [`cascade`] chains a primary stream into a continuation computed from
//! everything the primary emitted, and [`wrap_step`] turns a raw step
//! stream into marker-delimited chunks plus a folded result snapshot.

use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::engine::{EngineError, EngineOutput, EngineState, EngineStream, StepChunk, Usage};
use crate::trace::TraceReporter;

// ============================================================================
// Cascade
// ============================================================================

/// Fixed items surrounding the cascaded streams.
#[derive(Debug, Clone, Default)]
pub struct CascadeParts<T> {
    /// Emitted before the primary stream.
    pub prefix: Vec<T>,
    /// Emitted between the primary stream and the continuation.
    pub bridge: Vec<T>,
    /// Emitted after the continuation completes.
    pub suffix: Vec<T>,
}

/// Chain a primary stream into a continuation derived from its items.
///
/// Items are forwarded as they arrive while an accumulator folds over them;
/// the primary is consumed exactly once. When it completes, the bridge items
/// are emitted and the continuation is built from the final accumulator. An
/// error from the primary propagates after the items already emitted, and
/// the continuation never runs.
pub fn cascade<T, E, Acc, Fold, Cont, S>(
    primary: impl Stream<Item = Result<T, E>> + Send + 'static,
    seed: Acc,
    mut fold: Fold,
    continuation: Cont,
    parts: CascadeParts<T>,
) -> impl Stream<Item = Result<T, E>> + Send + 'static
where
    T: Clone + Send + 'static,
    E: Send + 'static,
    Acc: Send + 'static,
    Fold: FnMut(&mut Acc, &T) + Send + 'static,
    Cont: FnOnce(Acc) -> S + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
{
    stream! {
        for item in parts.prefix {
            yield Ok(item);
        }

        let mut acc = seed;
        let mut primary = Box::pin(primary);
        while let Some(item) = primary.next().await {
            match item {
                Ok(item) => {
                    fold(&mut acc, &item);
                    yield Ok(item);
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }

        for item in parts.bridge {
            yield Ok(item);
        }

        let mut tail = Box::pin(continuation(acc));
        while let Some(item) = tail.next().await {
            let failed = item.is_err();
            yield item;
            if failed {
                return;
            }
        }

        for item in parts.suffix {
            yield Ok(item);
        }
    }
}

// ============================================================================
// Step Wrapping
// ============================================================================

/// One fragment of a raw step stream.
#[derive(Debug, Clone, Default)]
pub struct StepResponse {
    pub text: String,
    /// Usage attached to the fragment, when the model reports it.
    pub usage: Option<Usage>,
}

/// Wrap a raw step stream in marker chunks and a terminal result snapshot.
///
/// The wrapped stream emits the start marker, every fragment as a chunk
/// from `node`, the end marker, and finally a state snapshot built by
/// `result` from the concatenated fragment text. Usage reported by
/// fragments is accumulated against the session as it arrives, so totals
/// are current whenever the span around the session ends.
pub fn wrap_step<S, F>(
    node: &str,
    source: S,
    start_marker: &str,
    end_marker: &str,
    reporter: TraceReporter,
    session_id: &str,
    result: F,
) -> EngineStream
where
    S: Stream<Item = Result<StepResponse, EngineError>> + Send + 'static,
    F: FnOnce(String) -> EngineState + Send + 'static,
{
    let node = node.to_string();
    let start_marker = start_marker.to_string();
    let end_marker = end_marker.to_string();
    let session_id = session_id.to_string();

    Box::pin(stream! {
        yield Ok(EngineOutput::Chunk(StepChunk {
            node: node.clone(),
            chunk: start_marker,
        }));

        let mut collected = String::new();
        let mut source = Box::pin(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(response) => {
                    if let Some(usage) = response.usage {
                        reporter.accumulate_tokens(&session_id, usage);
                    }
                    collected.push_str(&response.text);
                    yield Ok(EngineOutput::Chunk(StepChunk {
                        node: node.clone(),
                        chunk: response.text,
                    }));
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }

        yield Ok(EngineOutput::Chunk(StepChunk {
            node: node.clone(),
            chunk: end_marker,
        }));
        yield Ok(EngineOutput::Snapshot(result(collected)));
    })
}
