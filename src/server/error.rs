//! Gateway error type and its HTTP representation.
//!
//! Only errors found before a response is committed go through here. Once
//! an event stream has started, failures travel in-band as `error` events.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::backend::BackendError;
use crate::prompt::FormatError;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed or missing request fields.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Failed to format prompt: {0}")]
    Format(#[from] FormatError),

    #[error("Failed to call LLM backend: {0}")]
    Backend(#[from] BackendError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Format(_) | GatewayError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::Validation(format!("Invalid JSON: {}", rejection.body_text()))
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::Validation(msg) => warn!("Rejected request: {msg}"),
            other => error!("Request failed: {other}"),
        }

        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::from(FormatError::MissingVariable { name: "text".into() }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::from(BackendError::Truncated).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_includes_cause() {
        let err = GatewayError::from(BackendError::Backend("model not found".into()));
        assert_eq!(
            err.to_string(),
            "Failed to call LLM backend: Backend reported an error: model not found"
        );
    }
}
