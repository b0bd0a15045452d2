//! Support store - conversations and their messages

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{conversations, messages};
use crate::error::StoreError;
use crate::lifecycle;
use crate::models::{
    Conversation, ConversationStatus, ConversationSummary, ConversationUpdate, ListOptions,
    Message, Priority,
};
use crate::StoreConfig;

/// Support store
///
/// Every mutation is a single-row operation except [`SupportStore::append_message`],
/// which inserts the message and bumps the conversation's `last_message_at`
/// inside one transaction.
pub struct SupportStore {
    db: DatabaseConnection,
    // Serializes get-or-create so a client never ends up with two active threads
    create_lock: Mutex<()>,
}

impl SupportStore {
    /// Open the database at `config.db_path` and run migrations
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let db_path_str = config.db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db = Database::connect(db_url.as_str()).await?;
        crate::migration::Migrator::up(&db, None).await?;

        info!("Support store initialized at {}", config.db_path.display());

        Ok(Self::with_connection(db))
    }

    /// Create a support store with an existing, already migrated connection
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            create_lock: Mutex::new(()),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create a new active conversation for a client
    pub async fn create_conversation(
        &self,
        client_id: &str,
        assigned_to: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now().timestamp_millis();

        let model = conversations::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            client_id: Set(client_id.to_string()),
            status: Set(ConversationStatus::Active.as_str().to_string()),
            assigned_to: Set(assigned_to),
            priority: Set(Priority::Normal.as_str().to_string()),
            last_message_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        info!(
            "Created conversation {} for client {}",
            model.id, model.client_id
        );
        Ok(to_conversation(model))
    }

    /// Get a single conversation by ID
    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(to_conversation)
            .ok_or(StoreError::NotFound("Conversation"))
    }

    /// Conversation with its unread count and last message preview
    pub async fn conversation_summary(
        &self,
        id: &str,
        include_internal_notes: bool,
    ) -> Result<ConversationSummary, StoreError> {
        let conversation = self.get_conversation(id).await?;
        self.summarize(conversation, include_internal_notes).await
    }

    /// Apply a status/assignment/priority change
    pub async fn update_conversation(
        &self,
        id: &str,
        update: ConversationUpdate,
    ) -> Result<Conversation, StoreError> {
        let model = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound("Conversation"))?;

        let mut active: conversations::ActiveModel = model.into();
        if let Some(status) = update.status {
            active.status = Set(status.as_str().to_string());
        }
        if let Some(priority) = update.priority {
            active.priority = Set(priority.as_str().to_string());
        }
        if let Some(assigned_to) = update.assigned_to {
            active.assigned_to = Set(assigned_to);
        }
        active.updated_at = Set(Utc::now().timestamp_millis());

        let model = active.update(&self.db).await?;
        info!(
            "Updated conversation {} (status={}, priority={})",
            model.id, model.status, model.priority
        );
        Ok(to_conversation(model))
    }

    /// Active conversations, most recent activity first
    pub async fn list_active_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let query = conversations::Entity::find()
            .filter(conversations::Column::Status.eq(ConversationStatus::Active.as_str()));
        self.summaries(query, true).await
    }

    /// Every conversation regardless of status, most recent activity first
    pub async fn list_all_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.summaries(conversations::Entity::find(), true).await
    }

    /// Conversations owned by one client, as that client sees them
    pub async fn list_conversations_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let query =
            conversations::Entity::find().filter(conversations::Column::ClientId.eq(client_id));
        self.summaries(query, false).await
    }

    /// Return the client's latest active conversation, creating one if needed
    pub async fn get_or_create_active_conversation(
        &self,
        client_id: &str,
    ) -> Result<Conversation, StoreError> {
        let _guard = self.create_lock.lock().await;

        let existing = conversations::Entity::find()
            .filter(conversations::Column::ClientId.eq(client_id))
            .filter(conversations::Column::Status.eq(ConversationStatus::Active.as_str()))
            .order_by_desc(conversations::Column::CreatedAt)
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => Ok(to_conversation(model)),
            None => self.create_conversation(client_id, None).await,
        }
    }

    /// Append a message and bump the conversation's `last_message_at`
    ///
    /// Content is validated before any storage access. The append is refused
    /// with [`StoreError::ConversationResolved`] once the conversation is
    /// resolved, leaving the message count unchanged.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        is_internal_note: bool,
    ) -> Result<Message, StoreError> {
        lifecycle::validate_content(content)?;

        let txn = self.db.begin().await?;

        let conversation = conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&txn)
            .await?
            .ok_or(StoreError::NotFound("Conversation"))?;
        lifecycle::ensure_appendable(&to_conversation(conversation.clone()))?;

        let now = Utc::now().timestamp_millis();
        // created_at never goes backwards within a conversation
        let created_at = now.max(conversation.last_message_at);

        let message = messages::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            conversation_id: Set(Some(conversation_id.to_string())),
            sender_id: Set(sender_id.to_string()),
            content: Set(content.to_string()),
            is_internal_note: Set(is_internal_note),
            read_at: Set(None),
            deleted_at: Set(None),
            created_at: Set(created_at),
            updated_at: Set(created_at),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut active: conversations::ActiveModel = conversation.into();
        active.last_message_at = Set(created_at);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;

        debug!(
            "Appended message {} to conversation {}",
            message.id, conversation_id
        );
        Ok(to_message(message))
    }

    /// Get conversation history, oldest first
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        options: ListOptions,
    ) -> Result<Vec<Message>, StoreError> {
        let models = history(conversation_id, options.include_internal_notes)
            .order_by_asc(messages::Column::CreatedAt)
            .order_by_asc(messages::Column::Seq)
            .limit(options.limit)
            .offset(options.offset)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(to_message).collect())
    }

    /// Most recent `window` messages, oldest first
    pub async fn list_recent_messages(
        &self,
        conversation_id: &str,
        window: u64,
        include_internal_notes: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let mut models = history(conversation_id, include_internal_notes)
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Seq)
            .limit(window)
            .all(&self.db)
            .await?;
        models.reverse();

        Ok(models.into_iter().map(to_message).collect())
    }

    /// Number of listed messages, for pagination
    pub async fn count_messages(
        &self,
        conversation_id: &str,
        include_internal_notes: bool,
    ) -> Result<u64, StoreError> {
        Ok(history(conversation_id, include_internal_notes)
            .count(&self.db)
            .await?)
    }

    /// Get message by ID
    pub async fn get_message(&self, message_id: &str) -> Result<Message, StoreError> {
        messages::Entity::find()
            .filter(messages::Column::Id.eq(message_id))
            .filter(messages::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
            .map(to_message)
            .ok_or(StoreError::NotFound("Message"))
    }

    /// Mark message as read
    pub async fn mark_message_read(&self, message_id: &str) -> Result<(), StoreError> {
        let model = messages::Entity::find()
            .filter(messages::Column::Id.eq(message_id))
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound("Message"))?;

        if model.read_at.is_some() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let mut active: messages::ActiveModel = model.into();
        active.read_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&self.db).await?;

        debug!("Marked message {} as read", message_id);
        Ok(())
    }

    /// Mark every unread message not written by `reader_id` as read
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
    ) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();

        let result = messages::Entity::update_many()
            .col_expr(messages::Column::ReadAt, Expr::value(now))
            .col_expr(messages::Column::UpdatedAt, Expr::value(now))
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::ReadAt.is_null())
            .filter(messages::Column::SenderId.ne(reader_id))
            .exec(&self.db)
            .await?;

        debug!(
            "Marked {} messages read in conversation {}",
            result.rows_affected, conversation_id
        );
        Ok(result.rows_affected)
    }

    /// Hide a message from every listing
    pub async fn soft_delete_message(&self, message_id: &str) -> Result<(), StoreError> {
        let model = messages::Entity::find()
            .filter(messages::Column::Id.eq(message_id))
            .filter(messages::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound("Message"))?;

        let now = Utc::now().timestamp_millis();
        let mut active: messages::ActiveModel = model.into();
        active.deleted_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&self.db).await?;

        info!("Soft-deleted message {}", message_id);
        Ok(())
    }

    /// Unread count: client-visible messages without a read marker
    pub async fn unread_count(&self, conversation_id: &str) -> Result<u64, StoreError> {
        Ok(history(conversation_id, false)
            .filter(messages::Column::ReadAt.is_null())
            .count(&self.db)
            .await?)
    }

    async fn last_message(
        &self,
        conversation_id: &str,
        include_internal_notes: bool,
    ) -> Result<Option<Message>, StoreError> {
        let model = history(conversation_id, include_internal_notes)
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Seq)
            .one(&self.db)
            .await?;
        Ok(model.map(to_message))
    }

    async fn summaries(
        &self,
        query: Select<conversations::Entity>,
        include_internal_notes: bool,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let models = query
            .order_by_desc(conversations::Column::LastMessageAt)
            .all(&self.db)
            .await?;

        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            summaries.push(
                self.summarize(to_conversation(model), include_internal_notes)
                    .await?,
            );
        }
        Ok(summaries)
    }

    async fn summarize(
        &self,
        conversation: Conversation,
        include_internal_notes: bool,
    ) -> Result<ConversationSummary, StoreError> {
        let unread_count = self.unread_count(&conversation.id).await?;
        let last_message = self
            .last_message(&conversation.id, include_internal_notes)
            .await?;
        Ok(ConversationSummary {
            conversation,
            unread_count,
            last_message,
        })
    }
}

/// Non-deleted messages of a conversation, optionally without internal notes
fn history(conversation_id: &str, include_internal_notes: bool) -> Select<messages::Entity> {
    let query = messages::Entity::find()
        .filter(messages::Column::ConversationId.eq(conversation_id))
        .filter(messages::Column::DeletedAt.is_null());
    if include_internal_notes {
        query
    } else {
        query.filter(messages::Column::IsInternalNote.eq(false))
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn to_conversation(model: conversations::Model) -> Conversation {
    // An unreadable status is treated as resolved so it cannot take appends
    let status = model.status.parse().unwrap_or_else(|_| {
        warn!(
            "Conversation {} has unknown status '{}', treating as resolved",
            model.id, model.status
        );
        ConversationStatus::Resolved
    });
    let priority = model.priority.parse().unwrap_or_else(|_| {
        warn!(
            "Conversation {} has unknown priority '{}'",
            model.id, model.priority
        );
        Priority::default()
    });

    Conversation {
        id: model.id,
        client_id: model.client_id,
        status,
        assigned_to: model.assigned_to,
        priority,
        last_message_at: from_millis(model.last_message_at),
        created_at: from_millis(model.created_at),
        updated_at: from_millis(model.updated_at),
    }
}

fn to_message(model: messages::Model) -> Message {
    Message {
        id: model.id,
        conversation_id: model.conversation_id,
        sender_id: model.sender_id,
        content: model.content,
        is_internal_note: model.is_internal_note,
        read_at: model.read_at.map(from_millis),
        created_at: from_millis(model.created_at),
        updated_at: from_millis(model.updated_at),
    }
}
