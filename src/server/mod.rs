//! HTTP server exposing the gateway API.
//!
//! - [`gateway_api`]: Request/response types, application state and route handlers
//! - [`streaming`]: SSE response carrying relayed stream events
//! - [`error`]: Error-to-status mapping

pub mod error;
pub mod gateway_api;
pub mod streaming;
