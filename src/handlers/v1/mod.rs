//! V1 API handlers.

mod streams;

pub use streams::{create_stream, stop_stream, structured_query};
