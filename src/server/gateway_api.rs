//! Gateway HTTP API.
//!
//! Routes, under the configured prefix (default `/api/v1`):
//! - POST /translate
//! - POST /generate
//! - POST /stream_response
//!
//! plus an unprefixed GET /health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::backend::ollama::OllamaClient;
use crate::backend::{BackendError, CompletionResult, CompletionService, FunctionCall};
use crate::config::{BackendConfig, Config, PromptConfig};
use crate::prompt::{FormatError, Message, MessageTemplate, PromptTemplate};
use crate::relay::StreamRelay;
use crate::server::error::GatewayError;
use crate::server::streaming::event_stream_response;

/// Completion services, one per endpoint.
#[derive(Clone)]
pub struct Services {
    pub translate: Arc<dyn CompletionService>,
    pub generate: Arc<dyn CompletionService>,
    pub stream: Arc<dyn CompletionService>,
}

impl Services {
    /// Ollama-backed services sharing one connection pool.
    pub fn ollama(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = OllamaClient::new(config)?;
        info!(server_url = client.base_url(), "Backend client ready");

        Ok(Self {
            translate: Arc::new(client.service(&config.translate_model)),
            generate: Arc::new(client.service(&config.generate_model)),
            stream: Arc::new(client.service(&config.stream_model)),
        })
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub translator: Arc<dyn CompletionService>,
    pub generator: Arc<dyn CompletionService>,
    pub relay: StreamRelay,
    pub translate_prompt: PromptTemplate,
    pub stream_prompt: PromptTemplate,
    pub start_time: Instant,
}

impl AppState {
    /// Fails if a configured prompt template does not parse.
    pub fn new(config: Arc<Config>, services: Services) -> Result<Self, FormatError> {
        let translate_prompt = PromptTemplate::chat(
            &config.prompts.translate_system,
            &config.prompts.translate_human,
        )?;
        let stream_prompt = stream_template(&config.prompts)?;
        let relay = StreamRelay::new(
            services.stream,
            config.server.framing,
            config.server.channel_capacity,
        );

        Ok(Self {
            translator: services.translate,
            generator: services.generate,
            relay,
            translate_prompt,
            stream_prompt,
            config,
            start_time: Instant::now(),
        })
    }
}

fn stream_template(prompts: &PromptConfig) -> Result<PromptTemplate, FormatError> {
    let mut messages = Vec::new();
    if let Some(system) = &prompts.stream_system {
        messages.push(MessageTemplate::system(system)?);
    }
    messages.push(MessageTemplate::human("{{prompt}}")?);
    Ok(PromptTemplate::new(messages))
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/translate", post(translate))
        .route("/generate", post(generate))
        .route("/stream_response", post(stream_response));

    let prefix = state.config.server.api_prefix.trim_matches('/');
    let router = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&format!("/{prefix}"), api)
    };

    router
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Translation request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TranslateRequest {
    pub output_lang: String,
    pub text: String,
}

/// Single-shot generation request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    pub prompt: String,
}

/// Streaming generation request; the body itself is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Response of the blocking endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl From<CompletionResult> for GatewayResponse {
    fn from(result: CompletionResult) -> Self {
        let response = match &result.function_call {
            Some(call) if result.text.is_empty() => format!("Function call: {call}"),
            _ => result.text,
        };
        Self {
            response,
            function_call: result.function_call,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub models: ModelsResponse,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub translate: String,
    pub generate: String,
    pub stream: String,
}

fn require(field: &str, value: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::Validation(format!("'{field}' must not be empty")));
    }
    Ok(())
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn translate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<GatewayResponse>, GatewayError> {
    let Json(req) = payload?;
    require("outputLang", &req.output_lang)?;
    require("text", &req.text)?;

    info!(
        output_lang = %req.output_lang,
        chars = req.text.chars().count(),
        "Translate request"
    );

    let values = HashMap::from([
        ("outputLang".to_string(), req.output_lang),
        ("text".to_string(), req.text),
    ]);
    let messages = state.translate_prompt.format(&values)?;
    let result = state.translator.complete(&messages).await?;

    Ok(Json(result.into()))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GatewayResponse>, GatewayError> {
    let Json(req) = payload?;
    require("prompt", &req.prompt)?;

    info!(chars = req.prompt.chars().count(), "Generate request");

    let messages = [Message::human(req.prompt)];
    let result = state.generator.complete(&messages).await?;

    Ok(Json(result.into()))
}

async fn stream_response(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let req: StreamRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StreamRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Validation(format!("Invalid JSON: {e}")))?
    };

    let prompt = match req.prompt {
        Some(prompt) => {
            require("prompt", &prompt)?;
            prompt
        }
        None => state.config.prompts.stream_default_prompt.clone(),
    };

    let values = HashMap::from([("prompt".to_string(), prompt)]);
    let messages = state.stream_prompt.format(&values)?;

    let request_id = Uuid::new_v4().to_string();
    info!(request_id = %request_id, "Stream request");

    // Headers go out as soon as this returns; everything after is in-band.
    let (rx, _relay) = state.relay.spawn(request_id, messages);
    Ok(event_stream_response(rx, state.config.server.sse_keep_alive()))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        models: ModelsResponse {
            translate: state.translator.model().to_string(),
            generate: state.generator.model().to_string(),
            stream: state.relay.service().model().to_string(),
        },
    })
}
