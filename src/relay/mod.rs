//! Streaming relay from a completion backend to an HTTP event stream.
//!
//! - [`event`]: Wire-level stream events and chunk framing
//! - [`pipeline`]: Per-request relay state machine

pub mod event;
pub mod pipeline;

pub use event::{EventKind, Framing, StreamEvent};
pub use pipeline::{RelayReport, RelayState, StreamRelay};
