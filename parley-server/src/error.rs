//! Error types for parley-server.

use crate::conversation::ConversationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Request-level errors.
///
/// Caller-side problems (bad parameters, unusable images) map to 400;
/// failures of the downstream capabilities map to 500.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to fetch image: {0}")]
    ImageFetch(String),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Image classification failed: {0}")]
    Classification(String),

    #[error("Conversation failed: {0}")]
    Conversation(#[from] ConversationError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) | ChatError::ImageFetch(_) | ChatError::ImageDecode(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Classification(_) | ChatError::Conversation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "INVALID_REQUEST",
            ChatError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ChatError::ImageFetch(_) => "IMAGE_FETCH_FAILED",
            ChatError::ImageDecode(_) => "IMAGE_DECODE_FAILED",
            ChatError::Classification(_) => "CLASSIFICATION_FAILED",
            ChatError::Conversation(_) => "CONVERSATION_FAILED",
        }
    }
}

/// API error body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ApiError {
            error: self.to_string(),
            code: self.code(),
        };
        (status, axum::Json(body)).into_response()
    }
}
