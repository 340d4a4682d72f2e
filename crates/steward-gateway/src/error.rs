//! Error types for the gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use steward_core::error::StoreError;
use steward_core::StewardError;

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("LLM collaborator error: {0}")]
    Llm(String),

    #[error("Engine error: {0}")]
    Engine(StewardError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error maps onto
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Llm(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Engine(e) => engine_status(e),
            GatewayError::InvalidConfig(_)
            | GatewayError::Io(_)
            | GatewayError::Serialization(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Engine errors carry their own HTTP semantics: malformed input is the
/// caller's fault, a duplicate feedback transition is a conflict, upstream
/// trouble is a bad gateway.
fn engine_status(error: &StewardError) -> StatusCode {
    match error {
        StewardError::InvalidInput(_) | StewardError::Learning(_) => StatusCode::BAD_REQUEST,
        StewardError::Store(StoreError::FeedbackAlreadySet(_)) => StatusCode::CONFLICT,
        StewardError::Store(StoreError::DecisionNotFound(_))
        | StewardError::Store(StoreError::RuleNotFound(_)) => StatusCode::NOT_FOUND,
        StewardError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StewardError> for GatewayError {
    fn from(e: StewardError) -> Self {
        GatewayError::Engine(e)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
