//! Delivery channel behavior against a real store

use std::sync::Arc;
use std::time::Duration;

use helpdesk_delivery::{
    ApiError, Caller, ChannelPhase, DeliveryChannel, DeliveryConfig, SubscriptionRegistry,
    SupportService,
};
use helpdesk_store::{NewMessage, Role, StoreConfig, StreamEvent, SupportStore};
use tempfile::NamedTempFile;
use tokio::time::timeout;

async fn create_test_service(path: &NamedTempFile, heartbeat: Duration) -> SupportService {
    let store = SupportStore::new(StoreConfig {
        db_path: path.path().to_path_buf(),
    })
    .await
    .expect("Failed to create support store");
    SupportService::new(
        Arc::new(store),
        Arc::new(SubscriptionRegistry::new()),
        DeliveryConfig {
            heartbeat_interval: heartbeat,
            ..DeliveryConfig::default()
        },
    )
}

fn client() -> Caller {
    Caller::new("client-1", Role::Client)
}

fn staff() -> Caller {
    Caller::new("staff-1", Role::Team)
}

fn text(content: &str) -> NewMessage {
    NewMessage {
        content: content.to_string(),
        is_internal_note: false,
    }
}

fn note(content: &str) -> NewMessage {
    NewMessage {
        content: content.to_string(),
        is_internal_note: true,
    }
}

async fn next(channel: &mut DeliveryChannel) -> StreamEvent {
    timeout(Duration::from_secs(5), channel.next_event())
        .await
        .expect("no event within 5s")
        .expect("channel closed")
}

async fn open_streaming(
    service: &SupportService,
    caller: Caller,
    conversation_id: &str,
) -> (DeliveryChannel, Vec<String>) {
    let mut channel = service
        .open_channel(Some(caller), conversation_id)
        .await
        .expect("Failed to open channel");
    assert_eq!(channel.phase(), ChannelPhase::Streaming);

    match next(&mut channel).await {
        StreamEvent::Connected(payload) => assert_eq!(payload.conversation_id, conversation_id),
        other => panic!("expected connected, got {:?}", other),
    }
    let history = match next(&mut channel).await {
        StreamEvent::InitialMessages(payload) => {
            payload.messages.into_iter().map(|m| m.content).collect()
        }
        other => panic!("expected initial-messages, got {:?}", other),
    };
    (channel, history)
}

#[tokio::test]
async fn test_replay_is_filtered_per_role() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_secs(3600)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();

    service
        .post_message(Some(client()), &conversation.id, text("printer is broken"))
        .await
        .unwrap();
    service
        .post_message(Some(staff()), &conversation.id, note("check the toner"))
        .await
        .unwrap();
    service
        .post_message(Some(staff()), &conversation.id, text("on it"))
        .await
        .unwrap();

    let (_client_channel, history) = open_streaming(&service, client(), &conversation.id).await;
    assert_eq!(history, vec!["printer is broken", "on it"]);

    let (_staff_channel, history) = open_streaming(&service, staff(), &conversation.id).await;
    assert_eq!(history, vec!["printer is broken", "check the toner", "on it"]);
}

#[tokio::test]
async fn test_live_messages_in_append_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_secs(3600)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();

    let (mut client_channel, _) = open_streaming(&service, client(), &conversation.id).await;
    let (mut staff_channel, _) = open_streaming(&service, staff(), &conversation.id).await;

    for i in 0..5 {
        service
            .post_message(Some(client()), &conversation.id, text(&format!("m{}", i)))
            .await
            .unwrap();
    }
    service
        .post_message(Some(staff()), &conversation.id, note("internal"))
        .await
        .unwrap();
    service
        .post_message(Some(staff()), &conversation.id, text("done"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        match next(&mut client_channel).await {
            StreamEvent::NewMessage(payload) => seen.push(payload.message.content),
            other => panic!("expected new-message, got {:?}", other),
        }
    }
    assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4", "done"]);

    let mut seen = Vec::new();
    for _ in 0..7 {
        match next(&mut staff_channel).await {
            StreamEvent::NewMessage(payload) => seen.push(payload.message.content),
            other => panic!("expected new-message, got {:?}", other),
        }
    }
    assert_eq!(seen[5], "internal");
    assert_eq!(seen[6], "done");
}

#[tokio::test]
async fn test_resolution_keeps_channel_open() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_millis(50)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();
    let (mut channel, _) = open_streaming(&service, client(), &conversation.id).await;

    service
        .update_conversation(
            Some(staff()),
            &conversation.id,
            serde_json::from_str(r#"{"status":"resolved"}"#).unwrap(),
        )
        .await
        .unwrap();

    let err = service
        .post_message(Some(client()), &conversation.id, text("hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ConversationResolved));

    // Still streaming: heartbeats keep arriving
    assert!(matches!(next(&mut channel).await, StreamEvent::Heartbeat(_)));
    assert!(matches!(next(&mut channel).await, StreamEvent::Heartbeat(_)));
    assert_eq!(channel.phase(), ChannelPhase::Streaming);
}

#[tokio::test]
async fn test_close_all_ends_channel() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_secs(3600)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();
    let (mut channel, _) = open_streaming(&service, client(), &conversation.id).await;

    service.registry().close_all();

    let event = timeout(Duration::from_secs(5), channel.next_event())
        .await
        .expect("channel did not close");
    assert!(event.is_none());
    assert_eq!(channel.phase(), ChannelPhase::Closed);
}

#[tokio::test]
async fn test_handshake_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_secs(3600)).await;

    // Identity is checked before the identifier shape
    assert!(matches!(
        service.open_channel(None, "garbage").await,
        Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
        service.open_channel(Some(staff()), "garbage").await,
        Err(ApiError::InvalidIdentifier("conversation"))
    ));
    assert!(matches!(
        service
            .open_channel(Some(staff()), &uuid::Uuid::new_v4().to_string())
            .await,
        Err(ApiError::NotFound("Conversation"))
    ));

    let conversation = service.start_conversation(Some(client())).await.unwrap();
    let stranger = Caller::new("client-2", Role::Client);
    assert!(matches!(
        service.open_channel(Some(stranger), &conversation.id).await,
        Err(ApiError::Forbidden)
    ));
    assert_eq!(service.registry().total_subscribers(), 0);
}

#[tokio::test]
async fn test_channel_opened_after_close_all_ends() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_secs(3600)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();

    service.registry().close_all();

    // The handshake still completes, then the channel ends
    let (mut channel, _) = open_streaming(&service, client(), &conversation.id).await;
    let event = timeout(Duration::from_secs(5), channel.next_event())
        .await
        .expect("channel did not close");
    assert!(event.is_none());
    assert_eq!(channel.phase(), ChannelPhase::Closed);
    assert_eq!(service.registry().total_subscribers(), 0);
}

#[tokio::test]
async fn test_heartbeat_not_starved_by_backlog() {
    let temp_file = NamedTempFile::new().unwrap();
    let service = create_test_service(&temp_file, Duration::from_millis(20)).await;
    let conversation = service.start_conversation(Some(client())).await.unwrap();
    let (mut channel, _) = open_streaming(&service, client(), &conversation.id).await;

    for i in 0..50 {
        service
            .post_message(Some(client()), &conversation.id, text(&format!("m{}", i)))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut messages = Vec::new();
    let mut first_heartbeat = None;
    while messages.len() < 50 {
        match next(&mut channel).await {
            StreamEvent::Heartbeat(_) => {
                first_heartbeat.get_or_insert(messages.len());
            }
            StreamEvent::NewMessage(payload) => messages.push(payload.message.content),
            other => panic!("unexpected {:?}", other),
        }
    }

    assert_eq!(first_heartbeat, Some(0));
    let expected: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
    assert_eq!(messages, expected);
}
