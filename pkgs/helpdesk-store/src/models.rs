//! Conversation and message data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Maximum number of characters in a conversation message
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Caller role as established by the authentication layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Team,
    Client,
}

impl Role {
    /// Admin and team members are staff
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Team)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Team => "team",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "team" => Ok(Role::Team),
            "client" => Ok(Role::Client),
            other => Err(StoreError::Validation(format!("Invalid role: {}", other))),
        }
    }
}

/// Conversation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "resolved" => Ok(ConversationStatus::Resolved),
            other => Err(StoreError::Validation(format!("Invalid status: {}", other))),
        }
    }
}

/// Conversation priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(StoreError::Validation(format!("Invalid priority: {}", other))),
        }
    }
}

/// Support conversation between one client and staff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub client_id: String,
    pub status: ConversationStatus,
    pub assigned_to: Option<String>,
    pub priority: Priority,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_resolved(&self) -> bool {
        self.status == ConversationStatus::Resolved
    }
}

/// Conversation row with derived unread count and last message preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
    pub last_message: Option<Message>,
}

/// Message inside a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    pub is_internal_note: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message as submitted by a caller, before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    #[serde(default)]
    pub is_internal_note: bool,
}

/// Staff-initiated change to a conversation
///
/// `assigned_to: Some(None)` clears the assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationUpdate {
    pub status: Option<ConversationStatus>,
    pub assigned_to: Option<Option<String>>,
    pub priority: Option<Priority>,
}

impl ConversationUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.assigned_to.is_none() && self.priority.is_none()
    }
}

/// Paging window for message history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: u64,
    pub offset: u64,
    /// Whether internal notes are part of the listing
    pub include_internal_notes: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            include_internal_notes: true,
        }
    }
}
