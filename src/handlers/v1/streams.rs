//! Streaming HTTP handlers.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path as PathExtract, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::api::StreamRequest;
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::{EventSink, OrchestratorError};

fn error_response(err: OrchestratorError) -> Response {
    match err {
        OrchestratorError::InvalidRequest(detail) => problem_details::bad_request(detail),
        OrchestratorError::SessionNotFound(id) => {
            problem_details::not_found(format!("session '{id}' not found"))
        }
        OrchestratorError::Engine(err) => problem_details::internal_error(err.to_string()),
    }
}

/// POST /api/v1/streams
///
/// Start or resume a streamed run and subscribe to its events.
///
/// Events emitted (SSE event name / data):
/// - `content`: a delivered text chunk with its classification
/// - `error`: the run failed; this is the stream's last event
/// - `complete`: the run (or the stop that won against it) finished
pub async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Response {
    let (sink, rx) = EventSink::channel(state.channel_capacity);

    let session_id = match state.orchestrator.start_or_resume(req, sink).await {
        Ok(session_id) => session_id,
        Err(e) => return error_response(e),
    };

    debug!(session_id = %session_id, "starting SSE stream");

    let sse_stream = ReceiverStream::new(rx)
        .map(|event| Event::default().event(event.event_name()).json_data(&event));

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(sse_stream).keep_alive(keep_alive).into_response()
}

/// POST /api/v1/streams/{session_id}/stop
///
/// Stop a running session. Stopping an unknown session is a no-op.
pub async fn stop_stream(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> StatusCode {
    state.orchestrator.stop(&session_id);
    StatusCode::NO_CONTENT
}

/// POST /api/v1/queries
///
/// Run the workflow without streaming and return its structured output.
pub async fn structured_query(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Response {
    match state.orchestrator.structured_query(req).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => error_response(e),
    }
}
