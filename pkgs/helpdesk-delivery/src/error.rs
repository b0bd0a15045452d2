//! Errors surfaced to HTTP callers
//!
//! Every response body is `{ "error": "<message>" }` with a generic message;
//! storage details are logged and never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use helpdesk_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Invalid {0} ID")]
    InvalidIdentifier(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("Cannot send messages to a resolved conversation")]
    ConversationResolved,
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidIdentifier(_)
            | ApiError::Validation(_)
            | ApiError::ConversationResolved => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => ApiError::NotFound(entity),
            StoreError::Validation(message) => ApiError::Validation(message),
            StoreError::ConversationResolved => ApiError::ConversationResolved,
            StoreError::Database(e) => {
                error!("Storage failure: {}", e);
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
