//! Streaming
//!
//! One task per request moves fragments from the backend to the panel that
//! asked. Tasks never share state: each owns its accumulator and its
//! cancellation token.
//!
//! ```text
//!  LlmBackend ──StreamingToken──▶ run_stream ──PanelMessage──▶ panel channel
//!                                    │
//!                         ResponseAccumulator
//! ```

mod accumulator;
mod relay_task;

pub use accumulator::ResponseAccumulator;
pub use relay_task::{run_stream, StreamJob};

// Re-export StreamingToken from backend for convenience
pub use crate::backend::StreamingToken;
