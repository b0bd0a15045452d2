//! Role-based visibility rules
//!
//! These predicates are shared by history listing and live push so both
//! paths expose exactly the same messages to a caller.

use crate::models::{Conversation, ConversationSummary, Message, NewMessage, Role};

/// Staff see every message; clients never see internal notes
pub fn can_see_message(message: &Message, role: Role) -> bool {
    role.is_staff() || !message.is_internal_note
}

/// Clients cannot author internal notes; the flag is silently dropped
pub fn sanitize_outgoing_message(mut input: NewMessage, role: Role) -> NewMessage {
    if !role.is_staff() {
        input.is_internal_note = false;
    }
    input
}

/// Staff may open any conversation, a client only their own
pub fn can_access_conversation(conversation: &Conversation, caller_id: &str, role: Role) -> bool {
    role.is_staff() || conversation.client_id == caller_id
}

/// Keep only the messages `role` may see, preserving order
pub fn visible_messages(messages: Vec<Message>, role: Role) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| can_see_message(m, role))
        .collect()
}

/// Drop a last-message preview `role` may not see
pub fn visible_summary(mut summary: ConversationSummary, role: Role) -> ConversationSummary {
    summary.last_message = summary
        .last_message
        .filter(|message| can_see_message(message, role));
    summary
}
