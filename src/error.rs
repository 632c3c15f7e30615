//! Gateway error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Request-scoped failure. None of these take the service down.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Server-side misconfiguration (e.g. no shared secret).
    #[error("{0}")]
    Config(String),

    /// Missing or wrong credential header.
    #[error("Unauthorized")]
    Unauthorized,

    /// Malformed request body, bad upload or unparseable PDF.
    #[error("{0}")]
    Validation(String),

    /// Upload exceeded the configured body limit.
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Both upstream protocols failed, or the stream broke mid-way.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The upstream request exceeded its deadline.
    #[error("Backend request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Failure of a single upstream protocol attempt.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Non-2xx answer from the backend.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Payload did not match the protocol's shape.
    #[error("malformed backend payload: {0}")]
    Decode(String),

    /// The backend signalled a failure inside an open stream.
    #[error("backend stream failed: {0}")]
    StreamFailed(String),

    /// The call succeeded but carried no output text.
    #[error("backend returned no output text")]
    EmptyOutput,
}

impl RelayError {
    /// Whether the failure looks like the endpoint simply is not implemented
    /// by the backend, as opposed to a broken backend or network.
    pub fn is_unsupported(&self) -> bool {
        match self {
            RelayError::Status { status, .. } => matches!(*status, 400 | 404 | 405 | 501),
            RelayError::EmptyOutput | RelayError::Decode(_) => true,
            RelayError::Transport(_) | RelayError::StreamFailed(_) => false,
        }
    }
}

impl From<RelayError> for GatewayError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Transport(e) if e.is_timeout() => GatewayError::Timeout,
            other => GatewayError::Backend(other.to_string()),
        }
    }
}

/// JSON error body, `{"detail": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
