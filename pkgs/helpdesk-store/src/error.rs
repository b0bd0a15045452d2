//! Error types for storage operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors raised by the conversation store and the rules around it
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conversation is resolved")]
    ConversationResolved,
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    /// Whether the error came from constraint checks rather than storage
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_) | StoreError::ConversationResolved
        )
    }
}
