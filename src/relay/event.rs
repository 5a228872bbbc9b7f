//! Stream events and how backend chunks are cut into them.

use serde::{Deserialize, Serialize};

use crate::backend::{Chunk, FunctionCall};

/// Kind of a framed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Generated output.
    Data,
    /// The model requested a function call.
    FunctionCall,
    /// The completion failed; always the last event of a stream.
    Error,
}

impl EventKind {
    /// SSE `event:` field, `None` for the default message type.
    pub fn sse_name(&self) -> Option<&'static str> {
        match self {
            EventKind::Data => None,
            EventKind::FunctionCall => Some("function_call"),
            EventKind::Error => Some("error"),
        }
    }
}

/// One framed unit of the outbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub payload: String,
}

impl StreamEvent {
    pub fn data(payload: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Data,
            payload: payload.into(),
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            payload: payload.into(),
        }
    }

    /// The call serialized as `{"name":...,"arguments":...}`.
    pub fn function_call(call: &FunctionCall) -> Self {
        Self {
            kind: EventKind::FunctionCall,
            payload: serde_json::to_string(call).unwrap_or_else(|_| call.to_string()),
        }
    }
}

/// How a chunk is turned into data events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One event per non-empty line.
    #[default]
    PerLine,
    /// One multi-line event per chunk.
    PerChunk,
}

impl Framing {
    pub fn frame(&self, chunk: &Chunk) -> Vec<StreamEvent> {
        match self {
            Framing::PerLine => chunk.lines().map(StreamEvent::data).collect(),
            Framing::PerChunk => {
                let lines: Vec<String> = chunk.lines().collect();
                if lines.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamEvent::data(lines.join("\n"))]
                }
            }
        }
    }
}
