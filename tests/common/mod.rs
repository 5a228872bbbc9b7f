//! Shared test fixtures: a scripted completion service and app builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;

use llm_gateway::backend::{
    BackendError, Chunk, ChunkControl, ChunkHandler, CompletionResult, CompletionService,
    StreamOutcome,
};
use llm_gateway::config::Config;
use llm_gateway::prompt::Message;
use llm_gateway::server::gateway_api::{build_router, AppState, Services};

/// Completion service that replays a script and records what it was asked.
pub struct MockService {
    model: String,
    reply: Result<CompletionResult, String>,
    chunks: Vec<String>,
    stream_error: Option<String>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
}

impl MockService {
    pub fn replying(text: &str) -> Self {
        Self {
            model: "mock".to_string(),
            reply: Ok(CompletionResult::text(text)),
            chunks: Vec::new(),
            stream_error: None,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            stream_error: Some(message.to_string()),
            ..Self::replying("")
        }
    }

    pub fn streaming(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            reply: Ok(CompletionResult::text(chunks.concat())),
            ..Self::replying("")
        }
    }

    /// Fail after the scripted chunks have been streamed.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().unwrap().clone()
    }

    fn record(&self, messages: &[Message]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
    }
}

#[async_trait]
impl CompletionService for MockService {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<CompletionResult, BackendError> {
        self.record(messages);
        self.reply.clone().map_err(BackendError::Backend)
    }

    async fn stream(&self, messages: &[Message], handler: &mut dyn ChunkHandler) -> StreamOutcome {
        self.record(messages);
        for chunk in &self.chunks {
            if handler.on_chunk(Chunk::from(chunk.clone())).await == ChunkControl::Abort {
                return StreamOutcome::Aborted;
            }
        }
        match &self.stream_error {
            Some(message) => StreamOutcome::Failed(BackendError::Backend(message.clone())),
            None => StreamOutcome::Completed(CompletionResult::text(self.chunks.concat())),
        }
    }
}

/// Config tuned for tests: no keep-alive comments in stream bodies.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.sse_keep_alive_secs = 0;
    config
}

/// Router with every endpoint backed by `service`.
pub fn app_with(service: Arc<MockService>) -> Router {
    let services = Services {
        translate: service.clone(),
        generate: service.clone(),
        stream: service,
    };
    let state = AppState::new(Arc::new(test_config()), services).unwrap();
    build_router(Arc::new(state))
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
