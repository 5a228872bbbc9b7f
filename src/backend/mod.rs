//! Completion backend abstraction.
//!
//! - [`ollama`]: Ollama `/api/chat` client over a shared connection pool
//!
//! Handlers and the stream relay only see the [`CompletionService`] trait,
//! so the backend can be swapped or scripted in tests.

pub mod ollama;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompt::Message;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error talking to backend: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Malformed backend reply: {0}")]
    Malformed(String),

    #[error("Backend produced no output for {0:?}")]
    IdleTimeout(Duration),

    #[error("Backend stream ended before completion")]
    Truncated,
}

/// A function/tool invocation requested by the model instead of plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

/// Final result of a completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResult {
    /// Text of the first choice.
    pub text: String,

    /// Set when the backend asked for a function call.
    pub function_call: Option<FunctionCall>,
}

impl CompletionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_call: None,
        }
    }
}

/// A piece of streamed output, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Bytes);

impl Chunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Non-empty lines of the chunk in textual order. A `\r` before the line
    /// break is dropped; invalid UTF-8 is replaced.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.0
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
    }
}

impl From<&'static str> for Chunk {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

/// What the stream consumer wants after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Abort,
}

/// Terminal outcome of a streaming completion.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed(CompletionResult),
    Failed(BackendError),
    /// The handler asked to stop.
    Aborted,
}

/// Receives streamed chunks in backend emission order.
#[async_trait]
pub trait ChunkHandler: Send {
    async fn on_chunk(&mut self, chunk: Chunk) -> ChunkControl;
}

/// A remote model bound to one model identifier.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model identifier used for every call.
    fn model(&self) -> &str;

    /// Run a completion and wait for the whole result.
    async fn complete(&self, messages: &[Message]) -> Result<CompletionResult, BackendError>;

    /// Run a completion, handing each chunk to `handler` as it arrives.
    ///
    /// Stops reading and releases the backend connection as soon as the
    /// handler returns [`ChunkControl::Abort`].
    async fn stream(&self, messages: &[Message], handler: &mut dyn ChunkHandler) -> StreamOutcome;
}
