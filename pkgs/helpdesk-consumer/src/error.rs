//! Error types for stream consumption

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The connection could not be opened or dropped mid-stream
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server refused the stream (401/403/404/400); retrying cannot help
    #[error("Stream rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed {event} event: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Consumer has stopped")]
    Stopped,
}

impl ConsumerError {
    /// Whether the reconnection loop should retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConsumerError::Transport(_) | ConsumerError::Http(_))
    }
}
