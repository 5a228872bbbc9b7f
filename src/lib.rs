//! llm-gateway: HTTP gateway for an Ollama-compatible LLM backend.
//!
//! Relays three kinds of requests to the backend:
//!   translate (templated, buffered) · generate (raw prompt, buffered) ·
//!   stream_response (live Server-Sent Events)
//!
//! The streaming path is handled by the [`relay`], which forwards backend
//! output line by line and reports failures in-band.

pub mod backend;
pub mod config;
pub mod prompt;
pub mod relay;
pub mod server;
