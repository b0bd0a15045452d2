//! Sea-ORM entities for helpdesk-store

pub mod conversations;
pub mod messages;

pub use conversations::Entity as Conversation;
pub use messages::Entity as Message;
