//! Flowline - streaming session orchestration for multi-step agent workflows.
//!
//! A host service wires its compiled workflow graph in through the
//! [`engine::WorkflowEngine`] trait; Flowline manages the per-session
//! lifecycle around it: registry, streamed delivery, trace spans with token
//! accounting, multi-turn context bookkeeping, and race-free cleanup.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod background;
pub mod config;

// ============================================================================
// Server & HTTP
// ============================================================================

pub mod api;
pub mod handlers;
pub mod server;

// ============================================================================
// Domain
// ============================================================================

pub mod classify;
pub mod engine;
pub mod session;
pub mod stream;
pub mod trace;
pub mod turns;
