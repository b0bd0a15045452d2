//! Role-gated support operations
//!
//! Shared by the REST handlers and the live delivery endpoint. Every
//! operation checks, in order: caller identity, identifier shape, input
//! validity, existence, then ownership.

use std::sync::Arc;

use helpdesk_store::lifecycle::{
    can_create_conversation, can_update_conversation, parse_update, validate_content,
};
use helpdesk_store::visibility::{
    can_access_conversation, can_see_message, sanitize_outgoing_message, visible_messages,
    visible_summary,
};
use helpdesk_store::{
    Conversation, ConversationStatus, ConversationSummary, ListOptions, Message, NewMessage,
    SupportStore,
};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::DeliveryChannel;
use crate::config::DeliveryConfig;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::registry::SubscriptionRegistry;

/// Validate a path identifier, returning its canonical form
pub(crate) fn parse_id(raw: &str, kind: &'static str) -> Result<String, ApiError> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| ApiError::InvalidIdentifier(kind))
}

fn require(caller: Option<Caller>) -> Result<Caller, ApiError> {
    caller.ok_or(ApiError::Unauthorized)
}

/// Body of a conversation update
///
/// `assignedTo: null` clears the assignment, an absent field leaves it as is.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversationRequest {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub assigned_to: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub has_next: bool,
}

/// One page of conversation history
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

pub struct SupportService {
    store: Arc<SupportStore>,
    registry: Arc<SubscriptionRegistry>,
    config: DeliveryConfig,
    // Append + publish run under this lock so publish order is commit order
    append_lock: Mutex<()>,
}

impl SupportService {
    pub fn new(
        store: Arc<SupportStore>,
        registry: Arc<SubscriptionRegistry>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            append_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<SupportStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Open the live delivery channel for a conversation
    pub async fn open_channel(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
    ) -> Result<DeliveryChannel, ApiError> {
        DeliveryChannel::open(
            &self.store,
            &self.registry,
            &self.config,
            caller,
            raw_conversation_id,
        )
        .await
    }

    /// Staff see every conversation, clients only their own
    pub async fn list_conversations(
        &self,
        caller: Option<Caller>,
        status: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let caller = require(caller)?;
        let status: Option<ConversationStatus> = status.map(str::parse).transpose()?;

        let mut summaries = match (caller.is_staff(), status) {
            (true, Some(ConversationStatus::Active)) => {
                self.store.list_active_conversations().await?
            }
            (true, _) => self.store.list_all_conversations().await?,
            (false, _) => self.store.list_conversations_for_client(&caller.id).await?,
        };
        if let Some(status) = status {
            summaries.retain(|s| s.conversation.status == status);
        }
        Ok(summaries
            .into_iter()
            .map(|summary| visible_summary(summary, caller.role))
            .collect())
    }

    /// Return the caller's active conversation, opening one if needed
    pub async fn start_conversation(
        &self,
        caller: Option<Caller>,
    ) -> Result<Conversation, ApiError> {
        let caller = require(caller)?;
        if !can_create_conversation(caller.role) {
            return Err(ApiError::Forbidden);
        }
        Ok(self
            .store
            .get_or_create_active_conversation(&caller.id)
            .await?)
    }

    pub async fn get_conversation(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
    ) -> Result<ConversationSummary, ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_conversation_id, "conversation")?;
        let summary = self
            .store
            .conversation_summary(&id, caller.is_staff())
            .await?;
        if !can_access_conversation(&summary.conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }
        Ok(visible_summary(summary, caller.role))
    }

    /// Change status, priority or assignment (staff only)
    pub async fn update_conversation(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
        request: UpdateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_conversation_id, "conversation")?;
        if !can_update_conversation(caller.role) {
            return Err(ApiError::Forbidden);
        }

        let update = parse_update(
            request.status.as_deref(),
            request.priority.as_deref(),
            request.assigned_to.as_ref().map(|a| a.as_deref()),
        )?;
        if update.is_empty() {
            return Err(ApiError::Validation("No changes requested".to_string()));
        }

        let conversation = self.store.update_conversation(&id, update).await?;
        info!(
            "Conversation {} updated by {} ({})",
            conversation.id, caller.id, caller.role
        );
        Ok(conversation)
    }

    /// One page of visible history, oldest first
    ///
    /// `page` starts at 1. `limit` defaults to the configured page size and is
    /// clamped to the configured maximum.
    pub async fn list_messages(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
        page: Option<&str>,
        limit: Option<&str>,
    ) -> Result<MessagePage, ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_conversation_id, "conversation")?;
        let page = parse_positive(page, 1, "page")?;
        let limit = parse_positive(limit, self.config.page_size_default, "limit")?
            .min(self.config.page_size_max);

        let conversation = self.store.get_conversation(&id).await?;
        if !can_access_conversation(&conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }

        let include_internal_notes = caller.is_staff();
        let total = self
            .store
            .count_messages(&id, include_internal_notes)
            .await?;
        let messages = self
            .store
            .list_messages(
                &id,
                ListOptions {
                    limit,
                    offset: (page - 1).saturating_mul(limit),
                    include_internal_notes,
                },
            )
            .await?;

        Ok(MessagePage {
            messages: visible_messages(messages, caller.role),
            pagination: Pagination {
                page,
                limit,
                total,
                has_next: page.saturating_mul(limit) < total,
            },
        })
    }

    /// Append a message and push it to every open channel allowed to see it
    pub async fn post_message(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_conversation_id, "conversation")?;
        let message = sanitize_outgoing_message(message, caller.role);
        validate_content(&message.content)?;

        let conversation = self.store.get_conversation(&id).await?;
        if !can_access_conversation(&conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }

        let _guard = self.append_lock.lock().await;
        let stored = self
            .store
            .append_message(
                &id,
                &caller.id,
                &message.content,
                message.is_internal_note,
            )
            .await?;
        let delivered = self.registry.publish(&stored);
        debug!(
            "Message {} from {} queued for {} channel(s)",
            stored.id, caller.id, delivered
        );
        Ok(stored)
    }

    /// Mark the other party's messages in a conversation as read
    pub async fn mark_conversation_read(
        &self,
        caller: Option<Caller>,
        raw_conversation_id: &str,
    ) -> Result<u64, ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_conversation_id, "conversation")?;
        let conversation = self.store.get_conversation(&id).await?;
        if !can_access_conversation(&conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }
        Ok(self.store.mark_conversation_read(&id, &caller.id).await?)
    }

    /// Mark a single message as read
    ///
    /// Internal notes do not exist for clients, so they get `NotFound`.
    pub async fn mark_message_read(
        &self,
        caller: Option<Caller>,
        raw_message_id: &str,
    ) -> Result<(), ApiError> {
        let caller = require(caller)?;
        let id = parse_id(raw_message_id, "message")?;
        let message = self.store.get_message(&id).await?;
        if !can_see_message(&message, caller.role) {
            return Err(ApiError::NotFound("Message"));
        }

        let conversation_id = message
            .conversation_id
            .as_deref()
            .ok_or(ApiError::NotFound("Conversation"))?;
        let conversation = self.store.get_conversation(conversation_id).await?;
        if !can_access_conversation(&conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }

        Ok(self.store.mark_message_read(&id).await?)
    }
}

fn parse_positive(raw: Option<&str>, default: u64, name: &str) -> Result<u64, ApiError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(ApiError::Validation(format!(
            "{} must be a positive integer",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_id(&id.to_string().to_uppercase(), "conversation").unwrap(),
            id.to_string()
        );
        assert!(matches!(
            parse_id("not-a-uuid", "conversation"),
            Err(ApiError::InvalidIdentifier("conversation"))
        ));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(None, 20, "limit").unwrap(), 20);
        assert_eq!(parse_positive(Some("5"), 20, "limit").unwrap(), 5);
        assert!(parse_positive(Some("0"), 20, "page").is_err());
        assert!(parse_positive(Some("-1"), 20, "page").is_err());
        assert!(parse_positive(Some("abc"), 20, "page").is_err());
    }

    #[test]
    fn test_update_request_assignment() {
        let absent: UpdateConversationRequest =
            serde_json::from_str(r#"{"status":"resolved"}"#).unwrap();
        assert_eq!(absent.assigned_to, None);

        let cleared: UpdateConversationRequest =
            serde_json::from_str(r#"{"assignedTo":null}"#).unwrap();
        assert_eq!(cleared.assigned_to, Some(None));

        let set: UpdateConversationRequest =
            serde_json::from_str(r#"{"assignedTo":"staff-1"}"#).unwrap();
        assert_eq!(set.assigned_to, Some(Some("staff-1".to_string())));
    }
}
