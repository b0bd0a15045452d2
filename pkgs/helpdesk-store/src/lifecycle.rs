//! Conversation lifecycle rules
//!
//! Status is either `active` or `resolved`; any staff action may set either
//! value. Resolution only gates new appends, it never hides history.

use crate::error::StoreError;
use crate::models::{Conversation, ConversationUpdate, Role, MAX_MESSAGE_LENGTH};

/// Status, priority and assignment changes are staff-only
pub fn can_update_conversation(role: Role) -> bool {
    role.is_staff()
}

/// Conversations are opened by clients
pub fn can_create_conversation(role: Role) -> bool {
    role == Role::Client
}

/// Parse raw update fields against their enum sets
///
/// `assigned_to: Some(None)` clears the assignment; a blank assignee is
/// rejected.
pub fn parse_update(
    status: Option<&str>,
    priority: Option<&str>,
    assigned_to: Option<Option<&str>>,
) -> Result<ConversationUpdate, StoreError> {
    let assigned_to = match assigned_to {
        Some(Some(staff)) if staff.trim().is_empty() => {
            return Err(StoreError::Validation(
                "Assignee must not be empty".to_string(),
            ))
        }
        Some(value) => Some(value.map(str::to_string)),
        None => None,
    };

    Ok(ConversationUpdate {
        status: status.map(str::parse).transpose()?,
        priority: priority.map(str::parse).transpose()?,
        assigned_to,
    })
}

/// Content must hold between 1 and `MAX_MESSAGE_LENGTH` characters
pub fn validate_content(content: &str) -> Result<(), StoreError> {
    if content.is_empty() {
        return Err(StoreError::Validation(
            "Message content is required".to_string(),
        ));
    }
    let length = content.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(StoreError::Validation(format!(
            "Message content exceeds {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}

/// Appends are refused once a conversation is resolved
pub fn ensure_appendable(conversation: &Conversation) -> Result<(), StoreError> {
    if conversation.is_resolved() {
        return Err(StoreError::ConversationResolved);
    }
    Ok(())
}
