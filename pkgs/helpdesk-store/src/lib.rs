//! Helpdesk Store - persistent storage for support conversations
//!
//! This crate provides SQLite-based storage for client/staff support threads
//! using Sea-ORM, together with the pure rules that decide who may read and
//! write which messages.
//!
//! # Architecture
//!
//! - **SupportStore**: Conversations, messages, read markers and derived unread counts
//! - **visibility**: Role-based predicates for reading messages and creating internal notes
//! - **lifecycle**: Status/priority/assignment validation and the append gate
//! - **events**: Wire events pushed over the live delivery channel
//!
//! # Database Schema
//!
//! - `conversations`: One row per support thread, owned by exactly one client
//! - `messages`: Thread messages, ordered by `created_at` then insertion sequence
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use helpdesk_store::{StoreConfig, SupportStore};
//!
//! # async fn example() -> Result<(), helpdesk_store::StoreError> {
//! let store = SupportStore::new(StoreConfig {
//!     db_path: "helpdesk.db".into(),
//! })
//! .await?;
//!
//! let conversation = store.get_or_create_active_conversation("client-1").await?;
//! store
//!     .append_message(&conversation.id, "client-1", "Hello!", false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod migration;
pub mod models;
pub mod support_store;
pub mod visibility;

pub use error::StoreError;
pub use events::{
    ConnectedPayload, ErrorPayload, HeartbeatPayload, InitialMessagesPayload, NewMessagePayload,
    StreamEvent,
};
pub use models::{
    Conversation, ConversationStatus, ConversationSummary, ConversationUpdate, ListOptions,
    Message, NewMessage, Priority, Role, MAX_MESSAGE_LENGTH,
};
pub use support_store::SupportStore;

/// Configuration for the persistence layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("helpdesk.db"),
        }
    }
}
