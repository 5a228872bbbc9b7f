//! Ollama chat client.
//!
//! One [`OllamaClient`] is built at startup and shared by every request; it
//! wraps a pooled `reqwest::Client`. Each endpoint gets an
//! [`OllamaCompletionService`] bound to its model.
//!
//! Streaming replies are newline-delimited JSON:
//! `{"message":{"role":"assistant","content":"Hel"},"done":false}` ... followed
//! by a final object with `"done":true`. A line carrying `"error"` aborts the
//! stream.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{
    BackendError, Chunk, ChunkControl, ChunkHandler, CompletionResult, CompletionService,
    FunctionCall, StreamOutcome,
};
use crate::config::BackendConfig;
use crate::prompt::Message;

// ─── Wire Types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role().as_wire(),
            content: msg.content(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

impl ResponseMessage {
    fn first_function_call(&mut self) -> Option<FunctionCall> {
        if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls.swap_remove(0).function)
        }
    }
}

fn parse_reply(line: &[u8]) -> Result<ChatResponse, BackendError> {
    let mut reply: ChatResponse = serde_json::from_slice(line)
        .map_err(|e| BackendError::Malformed(e.to_string()))?;
    if let Some(message) = reply.error.take() {
        return Err(BackendError::Backend(message));
    }
    Ok(reply)
}

// ─── NDJSON Line Assembly ──────────────────────────────────────────────────

/// Reassembles newline-delimited records from arbitrarily split network
/// frames.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    fn extend(&mut self, frame: &[u8]) {
        self.buf.extend_from_slice(frame);
    }

    /// Next complete, non-blank line without its terminator.
    fn next_line(&mut self) -> Option<Bytes> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1).freeze();
            let line = line.slice(..pos);
            if !line.iter().all(u8::is_ascii_whitespace) {
                return Some(line);
            }
        }
        None
    }

    /// Whatever is left once the body ended without a final newline.
    fn finish(&mut self) -> Option<Bytes> {
        let rest = self.buf.split().freeze();
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

// ─── Client ────────────────────────────────────────────────────────────────

/// Shared connection to an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl OllamaClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(limit) = config.connect_timeout() {
            builder = builder.connect_timeout(limit);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            idle_timeout: config.stream_idle_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Await `fut` for at most the idle timeout.
    async fn within_idle<F: Future>(&self, fut: F) -> Result<F::Output, BackendError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| BackendError::IdleTimeout(limit)),
            None => Ok(fut.await),
        }
    }

    /// A completion service for `model` sharing this client's pool.
    pub fn service(&self, model: impl Into<String>) -> OllamaCompletionService {
        OllamaCompletionService {
            client: self.clone(),
            model: model.into(),
        }
    }

    async fn send_chat(
        &self,
        model: &str,
        messages: &[Message],
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let request = ChatRequest {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream,
        };

        let mut builder = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request);
        // Streams are bounded by the idle timeout instead.
        if let (false, Some(limit)) = (stream, self.request_timeout) {
            builder = builder.timeout(limit);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ChatResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(text);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

/// An [`OllamaClient`] bound to one model.
#[derive(Debug, Clone)]
pub struct OllamaCompletionService {
    client: OllamaClient,
    model: String,
}

/// What to do after one streamed record.
enum Step {
    Continue,
    Done,
    Abort,
}

#[derive(Default)]
struct Accumulated {
    text: String,
    function_call: Option<FunctionCall>,
}

impl Accumulated {
    fn into_result(self) -> CompletionResult {
        CompletionResult {
            text: self.text,
            function_call: self.function_call,
        }
    }
}

impl OllamaCompletionService {
    async fn apply_line(
        &self,
        line: &[u8],
        acc: &mut Accumulated,
        handler: &mut dyn ChunkHandler,
    ) -> Result<Step, BackendError> {
        let reply = parse_reply(line)?;

        if let Some(mut message) = reply.message {
            if acc.function_call.is_none() {
                acc.function_call = message.first_function_call();
            }
            if !message.content.is_empty() {
                acc.text.push_str(&message.content);
                if handler.on_chunk(Chunk::from(message.content)).await == ChunkControl::Abort {
                    return Ok(Step::Abort);
                }
            }
        }

        Ok(if reply.done { Step::Done } else { Step::Continue })
    }

    async fn run_stream(
        &self,
        messages: &[Message],
        handler: &mut dyn ChunkHandler,
    ) -> Result<Option<CompletionResult>, BackendError> {
        // The backend may hold its headers back while a model loads.
        let response = self
            .client
            .within_idle(self.client.send_chat(&self.model, messages, true))
            .await??;
        let mut body = response.bytes_stream().boxed();
        let mut lines = LineBuffer::default();
        let mut acc = Accumulated::default();

        loop {
            let next = self.client.within_idle(body.next()).await?;

            match next {
                Some(frame) => {
                    lines.extend(&frame?);
                    while let Some(line) = lines.next_line() {
                        match self.apply_line(&line, &mut acc, handler).await? {
                            Step::Continue => {}
                            Step::Done => return Ok(Some(acc.into_result())),
                            Step::Abort => return Ok(None),
                        }
                    }
                }
                None => {
                    if let Some(line) = lines.finish() {
                        match self.apply_line(&line, &mut acc, handler).await? {
                            Step::Done => return Ok(Some(acc.into_result())),
                            Step::Abort => return Ok(None),
                            Step::Continue => {}
                        }
                    }
                    return Err(BackendError::Truncated);
                }
            }
        }
    }
}

#[async_trait]
impl CompletionService for OllamaCompletionService {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<CompletionResult, BackendError> {
        debug!(model = %self.model, messages = messages.len(), "Blocking chat call");

        let response = self.client.send_chat(&self.model, messages, false).await?;
        let body = response.bytes().await?;
        let reply = parse_reply(&body)?;

        let mut message = reply
            .message
            .ok_or_else(|| BackendError::Malformed("reply has no message".to_string()))?;
        let function_call = message.first_function_call();

        Ok(CompletionResult {
            text: message.content,
            function_call,
        })
    }

    async fn stream(&self, messages: &[Message], handler: &mut dyn ChunkHandler) -> StreamOutcome {
        debug!(model = %self.model, messages = messages.len(), "Streaming chat call");

        match self.run_stream(messages, handler).await {
            Ok(Some(result)) => StreamOutcome::Completed(result),
            Ok(None) => {
                debug!(model = %self.model, "Stream aborted by consumer, dropping backend response");
                StreamOutcome::Aborted
            }
            Err(e) => {
                debug!(model = %self.model, "Backend stream failed: {e}");
                StreamOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_reassembles_split_frames() {
        let mut lines = LineBuffer::default();
        lines.extend(b"{\"done\":");
        assert!(lines.next_line().is_none());

        lines.extend(b"false}\n{\"done\":true}\n");
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"{\"done\":false}"));
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"{\"done\":true}"));
        assert!(lines.next_line().is_none());
        assert!(lines.finish().is_none());
    }

    #[test]
    fn test_line_buffer_skips_blank_lines() {
        let mut lines = LineBuffer::default();
        lines.extend(b"\n  \n{}\n");
        assert_eq!(lines.next_line().unwrap(), Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_line_buffer_finish_returns_tail() {
        let mut lines = LineBuffer::default();
        lines.extend(b"{\"done\":true}");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.finish().unwrap(), Bytes::from_static(b"{\"done\":true}"));
    }

    #[test]
    fn test_parse_reply_with_error() {
        let err = parse_reply(br#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, BackendError::Backend(msg) if msg == "model not found"));
    }

    #[test]
    fn test_parse_reply_malformed() {
        assert!(matches!(
            parse_reply(b"not json").unwrap_err(),
            BackendError::Malformed(_)
        ));
    }

    #[test]
    fn test_parse_reply_tool_call() {
        let reply = parse_reply(
            br#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"lookup","arguments":{"q":"rust"}}}]},"done":true}"#,
        )
        .unwrap();
        let call = reply.message.unwrap().first_function_call().unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.arguments, serde_json::json!({"q": "rust"}));
        assert!(reply.done);
    }

    #[test]
    fn test_zero_timeouts_are_not_applied() {
        let client = OllamaClient::new(&BackendConfig {
            connect_timeout_secs: 0,
            request_timeout_secs: 0,
            stream_idle_timeout_secs: 0,
            ..BackendConfig::default()
        })
        .unwrap();
        assert_eq!(client.request_timeout, None);
        assert_eq!(client.idle_timeout, None);
    }

    #[tokio::test]
    async fn test_within_idle_times_out() {
        let client = OllamaClient::new(&BackendConfig {
            stream_idle_timeout_secs: 1,
            ..BackendConfig::default()
        })
        .unwrap();

        let ready = client.within_idle(async { 7 }).await.unwrap();
        assert_eq!(ready, 7);

        let err = client
            .within_idle(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::IdleTimeout(limit) if limit == Duration::from_secs(1)));
    }

    #[test]
    fn test_wire_message_roles() {
        let msg = Message::human("hi");
        let wire = WireMessage::from(&msg);
        assert_eq!(wire.role, "user");
        assert_eq!(wire.content, "hi");
    }
}
