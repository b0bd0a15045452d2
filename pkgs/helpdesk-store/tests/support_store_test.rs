//! Tests for SupportStore
//!
//! Each test runs against a fresh SQLite file with migrations applied.

use helpdesk_store::{
    visibility, ConversationStatus, ConversationUpdate, ListOptions, Priority, Role, StoreConfig,
    StoreError, SupportStore, MAX_MESSAGE_LENGTH,
};
use sea_orm::{ConnectionTrait, Database};
use tempfile::NamedTempFile;

async fn create_test_store(path: &NamedTempFile) -> SupportStore {
    SupportStore::new(StoreConfig {
        db_path: path.path().to_path_buf(),
    })
    .await
    .expect("Failed to create support store")
}

fn all(limit: u64) -> ListOptions {
    ListOptions {
        limit,
        offset: 0,
        include_internal_notes: true,
    }
}

#[tokio::test]
async fn test_get_or_create_returns_same_active_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let first = store
        .get_or_create_active_conversation("client-1")
        .await
        .expect("Failed to create conversation");
    assert_eq!(first.status, ConversationStatus::Active);
    assert_eq!(first.client_id, "client-1");
    assert_eq!(first.priority, Priority::Normal);

    let second = store
        .get_or_create_active_conversation("client-1")
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_get_or_create_after_resolution_opens_new_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let first = store
        .get_or_create_active_conversation("client-1")
        .await
        .unwrap();
    store
        .update_conversation(
            &first.id,
            ConversationUpdate {
                status: Some(ConversationStatus::Resolved),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let next = store
        .get_or_create_active_conversation("client-1")
        .await
        .unwrap();
    assert_ne!(first.id, next.id);
    assert_eq!(next.status, ConversationStatus::Active);
}

#[tokio::test]
async fn test_get_missing_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let result = store.get_conversation("does-not-exist").await;
    assert!(matches!(result, Err(StoreError::NotFound("Conversation"))));

    let result = store
        .update_conversation("does-not-exist", ConversationUpdate::default())
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_append_then_list_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let appended = store
        .append_message(&conv.id, "staff-1", "Checking with the team", true)
        .await
        .unwrap();

    let listed = store.list_messages(&conv.id, all(50)).await.unwrap();
    let matching: Vec<_> = listed.iter().filter(|m| m.id == appended.id).collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].content, "Checking with the team");
    assert!(matching[0].is_internal_note);
    assert_eq!(matching[0].conversation_id.as_deref(), Some(conv.id.as_str()));
}

#[tokio::test]
async fn test_append_bumps_last_message_at() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let message = store
        .append_message(&conv.id, "client-1", "Hello", false)
        .await
        .unwrap();

    let reloaded = store.get_conversation(&conv.id).await.unwrap();
    assert_eq!(reloaded.last_message_at, message.created_at);
    assert!(reloaded.last_message_at >= conv.last_message_at);
}

#[tokio::test]
async fn test_messages_listed_in_creation_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let mut appended = Vec::new();
    for i in 0..20 {
        let sender = if i % 2 == 0 { "client-1" } else { "staff-1" };
        appended.push(
            store
                .append_message(&conv.id, sender, &format!("Message {}", i), false)
                .await
                .unwrap()
                .id,
        );
    }

    let listed = store.list_messages(&conv.id, all(100)).await.unwrap();
    for pair in listed.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
    let ids: Vec<_> = listed.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, appended);
}

#[tokio::test]
async fn test_content_length_bounds() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let too_long = "a".repeat(MAX_MESSAGE_LENGTH + 1);
    let result = store
        .append_message(&conv.id, "client-1", &too_long, false)
        .await;
    assert!(matches!(result, Err(StoreError::Validation(_))));

    let result = store.append_message(&conv.id, "client-1", "", false).await;
    assert!(matches!(result, Err(StoreError::Validation(_))));

    let blank = store
        .append_message(&conv.id, "client-1", " ", false)
        .await
        .expect("whitespace is within the length bound");
    assert_eq!(blank.content, " ");

    let exact = "a".repeat(MAX_MESSAGE_LENGTH);
    let message = store
        .append_message(&conv.id, "client-1", &exact, false)
        .await
        .expect("1000 characters must be accepted");
    assert_eq!(message.content.len(), MAX_MESSAGE_LENGTH);

    assert_eq!(store.count_messages(&conv.id, true).await.unwrap(), 2);
}

#[tokio::test]
async fn test_resolved_conversation_rejects_appends() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();
    store
        .append_message(&conv.id, "client-1", "Before resolution", false)
        .await
        .unwrap();

    store
        .update_conversation(
            &conv.id,
            ConversationUpdate {
                status: Some(ConversationStatus::Resolved),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let result = store
            .append_message(&conv.id, "client-1", "After resolution", false)
            .await;
        assert!(matches!(result, Err(StoreError::ConversationResolved)));
    }
    assert_eq!(store.count_messages(&conv.id, true).await.unwrap(), 1);

    // History stays readable and reopening allows appends again
    assert_eq!(store.list_messages(&conv.id, all(10)).await.unwrap().len(), 1);
    store
        .update_conversation(
            &conv.id,
            ConversationUpdate {
                status: Some(ConversationStatus::Active),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .append_message(&conv.id, "client-1", "Reopened", false)
        .await
        .unwrap();
    assert_eq!(store.count_messages(&conv.id, true).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_persisted_status_blocks_appends() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let db = Database::connect(format!("sqlite:{}", temp_file.path().display()).as_str())
        .await
        .unwrap();
    db.execute_unprepared(&format!(
        "UPDATE conversations SET status = 'archived' WHERE id = '{}'",
        conv.id
    ))
    .await
    .unwrap();

    let loaded = store.get_conversation(&conv.id).await.unwrap();
    assert_eq!(loaded.status, ConversationStatus::Resolved);
    let result = store
        .append_message(&conv.id, "client-1", "Hello", false)
        .await;
    assert!(matches!(result, Err(StoreError::ConversationResolved)));
}

#[tokio::test]
async fn test_append_to_missing_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let result = store
        .append_message("missing", "client-1", "Hello", false)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound("Conversation"))));
}

#[tokio::test]
async fn test_client_history_excludes_internal_notes() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    for i in 0..9 {
        let internal = i % 3 == 1;
        let sender = if internal { "staff-1" } else { "client-1" };
        store
            .append_message(&conv.id, sender, &format!("Message {}", i), internal)
            .await
            .unwrap();
    }

    let client_view = store
        .list_messages(
            &conv.id,
            ListOptions {
                limit: 50,
                offset: 0,
                include_internal_notes: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(client_view.len(), 6);
    assert!(client_view.iter().all(|m| !m.is_internal_note));

    let staff_view = store.list_messages(&conv.id, all(50)).await.unwrap();
    assert_eq!(staff_view.len(), 9);
    assert_eq!(visibility::visible_messages(staff_view, Role::Client), client_view);
    assert_eq!(store.count_messages(&conv.id, false).await.unwrap(), 6);
}

#[tokio::test]
async fn test_pagination_window() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    for i in 0..15 {
        store
            .append_message(&conv.id, "client-1", &format!("Message {}", i), false)
            .await
            .unwrap();
    }

    let page = store
        .list_messages(
            &conv.id,
            ListOptions {
                limit: 5,
                offset: 5,
                include_internal_notes: true,
            },
        )
        .await
        .unwrap();
    let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["Message 5", "Message 6", "Message 7", "Message 8", "Message 9"]
    );

    let recent = store.list_recent_messages(&conv.id, 3, true).await.unwrap();
    let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Message 12", "Message 13", "Message 14"]);
}

#[tokio::test]
async fn test_unread_count_and_read_markers() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let first = store
        .append_message(&conv.id, "client-1", "Hi", false)
        .await
        .unwrap();
    store
        .append_message(&conv.id, "client-1", "Anyone there?", false)
        .await
        .unwrap();
    store
        .append_message(&conv.id, "staff-1", "Internal: VIP", true)
        .await
        .unwrap();

    // Internal notes never count as unread
    assert_eq!(store.unread_count(&conv.id).await.unwrap(), 2);

    store.mark_message_read(&first.id).await.unwrap();
    assert_eq!(store.unread_count(&conv.id).await.unwrap(), 1);
    assert!(store.get_message(&first.id).await.unwrap().read_at.is_some());

    let updated = store
        .mark_conversation_read(&conv.id, "staff-1")
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(store.unread_count(&conv.id).await.unwrap(), 0);

    let missing = store.mark_message_read("missing").await;
    assert!(matches!(missing, Err(StoreError::NotFound("Message"))));
}

#[tokio::test]
async fn test_soft_deleted_messages_are_hidden() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;
    let conv = store.create_conversation("client-1", None).await.unwrap();

    let keep = store
        .append_message(&conv.id, "client-1", "Keep", false)
        .await
        .unwrap();
    let remove = store
        .append_message(&conv.id, "client-1", "Remove", false)
        .await
        .unwrap();

    store.soft_delete_message(&remove.id).await.unwrap();

    let listed = store.list_messages(&conv.id, all(10)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, keep.id);
    assert!(matches!(
        store.get_message(&remove.id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_conversation_listings() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_test_store(&temp_file).await;

    let older = store.create_conversation("client-1", None).await.unwrap();
    let newer = store
        .create_conversation("client-2", Some("staff-1".to_string()))
        .await
        .unwrap();
    store
        .append_message(&older.id, "client-1", "Bump", false)
        .await
        .unwrap();
    store
        .append_message(&older.id, "staff-1", "Note", true)
        .await
        .unwrap();
    store
        .update_conversation(
            &newer.id,
            ConversationUpdate {
                status: Some(ConversationStatus::Resolved),
                priority: Some(Priority::High),
                assigned_to: Some(None),
            },
        )
        .await
        .unwrap();

    let active = store.list_active_conversations().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].conversation.id, older.id);
    assert_eq!(active[0].unread_count, 1);
    assert!(active[0].last_message.as_ref().unwrap().is_internal_note);

    let every = store.list_all_conversations().await.unwrap();
    assert_eq!(every.len(), 2);
    for pair in every.windows(2) {
        assert!(pair[0].conversation.last_message_at >= pair[1].conversation.last_message_at);
    }
    let resolved = every
        .iter()
        .find(|s| s.conversation.id == newer.id)
        .unwrap();
    assert_eq!(resolved.conversation.priority, Priority::High);
    assert_eq!(resolved.conversation.assigned_to, None);

    let own = store.list_conversations_for_client("client-1").await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].last_message.as_ref().unwrap().content, "Bump");
}
