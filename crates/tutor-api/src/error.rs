//! API error types and JSON error response formatting.
//!
//! Every REST failure carries `{"error": <message>, "code": <machine code>}`,
//! so clients that only read `error` get a human-readable reason.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tutor_chat::ChatError;
use tutor_core::error::TutorError;

/// Message returned when no generation provider is configured.
pub const NOT_CONFIGURED: &str = "RAG not configured. Set GROQ_API_KEY.";

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code (e.g., "bad_request").
    pub code: &'static str,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid input.
    BadRequest(String),
    /// 413 Payload Too Large - upload exceeds the configured cap.
    PayloadTooLarge(String),
    /// 500 Internal Server Error - backend failure.
    Internal(String),
    /// 503 Service Unavailable - generation is not configured.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::PayloadTooLarge(msg) => ("payload_too_large", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        }

        (status, Json(ErrorBody { error: message, code })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid JSON payload: {}", rejection.body_text()))
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unavailable(reason) => {
                tracing::debug!(reason = %reason, "Generation unavailable");
                ApiError::ServiceUnavailable(NOT_CONFIGURED.to_string())
            }
            err if err.is_client_error() => ApiError::BadRequest(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        match err {
            TutorError::Transcription(msg) | TutorError::Synthesis(msg) => ApiError::Internal(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
