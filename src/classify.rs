//! Chunk classification for streamed workflow output.
//!
//! Workflow nodes interleave structural marker chunks (`[SQL]`, `[/SQL]`, …)
//! with visible text. Markers are never delivered to clients; they switch the
//! sticky classification applied to the plain chunks that follow.

use serde::{Deserialize, Serialize};

/// Classification of a streamed text chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkKind {
    /// Plain narrative text.
    Text,
    /// Generated SQL.
    Sql,
    /// A proposed execution plan.
    Plan,
    /// Result analysis.
    Analysis,
}

impl ChunkKind {
    /// The opening marker for this kind, if it has one.
    fn start_marker(self) -> Option<&'static str> {
        match self {
            ChunkKind::Text => None,
            ChunkKind::Sql => Some("[SQL]"),
            ChunkKind::Plan => Some("[PLAN]"),
            ChunkKind::Analysis => Some("[ANALYSIS]"),
        }
    }

    /// The closing marker for this kind, if it has one.
    fn end_marker(self) -> Option<&'static str> {
        match self {
            ChunkKind::Text => None,
            ChunkKind::Sql => Some("[/SQL]"),
            ChunkKind::Plan => Some("[/PLAN]"),
            ChunkKind::Analysis => Some("[/ANALYSIS]"),
        }
    }
}

const MARKED_KINDS: [ChunkKind; 3] = [ChunkKind::Sql, ChunkKind::Plan, ChunkKind::Analysis];

/// Classify a chunk given the sticky state from prior chunks.
///
/// Returns the new sticky state and whether the chunk is marker-only.
/// Marker-only chunks must not be forwarded; they exist solely to switch
/// the classification of subsequent plain chunks. Pure and deterministic.
#[must_use]
pub fn classify(prior: Option<ChunkKind>, chunk: &str) -> (ChunkKind, bool) {
    // An opening marker switches into that mode.
    for kind in MARKED_KINDS {
        if kind.start_marker() == Some(chunk) {
            return (kind, true);
        }
    }

    // A closing marker drops back to plain text. Unmatched closers are
    // still swallowed: they carry no visible content.
    for kind in MARKED_KINDS {
        if kind.end_marker() == Some(chunk) {
            return (ChunkKind::Text, true);
        }
    }

    (prior.unwrap_or(ChunkKind::Text), false)
}
