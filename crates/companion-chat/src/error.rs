//! Request-level error taxonomy and its HTTP mapping
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not authenticated")]
    Authentication,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Persistence(String),
    #[error("Completion provider error: {0}")]
    Provider(String),
}

impl ChatError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        ChatError::Persistence(err.to_string())
    }

    pub fn provider(err: impl std::fmt::Display) -> Self {
        ChatError::Provider(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Authentication => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        ChatError::Validation(rejection.body_text())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
