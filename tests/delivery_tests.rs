//! Delivery engine and seen-sync behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{chat_stack, connect, drain, user};
use sayhi_server::application::services::{ChatError, ChatService};
use sayhi_server::domain::{ConversationRepository, MessageContent, MessageRepository};
use sayhi_server::infrastructure::broker::{
    ActionTable, Broker, MemoryBroker, QueueConsumer, RpcClient,
};
use sayhi_server::realtime::ChatEvent;

#[tokio::test]
async fn non_participant_cannot_deliver() {
    let stack = chat_stack();
    let conversation = stack
        .conversations
        .create_or_get(user(1), user(2))
        .await
        .unwrap();

    let err = stack
        .delivery
        .deliver(user(3), conversation.id, MessageContent::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotParticipant));

    // nothing persisted
    assert!(stack
        .messages
        .find_by_conversation(conversation.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let stack = chat_stack();
    let conversation = stack
        .conversations
        .create_or_get(user(1), user(2))
        .await
        .unwrap();

    let err = stack
        .delivery
        .deliver(user(1), conversation.id, MessageContent::text("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
}

#[tokio::test]
async fn missing_conversation_is_rejected() {
    let stack = chat_stack();
    let err = stack
        .delivery
        .deliver(user(1), uuid::Uuid::from_u128(42), MessageContent::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound));
}

#[tokio::test]
async fn message_to_viewing_receiver_is_seen_on_arrival() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();

    let (conn_a, mut rx_a) = connect(&stack.presence, a);
    let (conn_b, mut rx_b) = connect(&stack.presence, b);
    stack.presence.join_conversation(conversation.id, &conn_a);
    stack.presence.join_conversation(conversation.id, &conn_b);

    let message = stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("hi"))
        .await
        .unwrap();
    assert!(message.seen);
    assert!(message.seen_at.is_some());

    // sender: one newMessage (deduplicated across room + personal
    // targets) and one messagesSeen naming the new message
    let events_a = drain(&mut rx_a);
    assert_eq!(events_a.len(), 2);
    match &events_a[0] {
        ChatEvent::NewMessage(delivered) => assert_eq!(delivered.id, message.id),
        other => panic!("expected newMessage, got {other:?}"),
    }
    match &events_a[1] {
        ChatEvent::MessagesSeen {
            conversation_id,
            seen_by,
            message_ids,
        } => {
            assert_eq!(*conversation_id, conversation.id);
            assert_eq!(*seen_by, b);
            assert_eq!(message_ids.as_slice(), &[message.id]);
        }
        other => panic!("expected messagesSeen, got {other:?}"),
    }

    // receiver: exactly one newMessage, no seen event
    let events_b = drain(&mut rx_b);
    assert_eq!(events_b.len(), 1);
    assert!(matches!(&events_b[0], ChatEvent::NewMessage(_)));
}

#[tokio::test]
async fn online_but_not_viewing_receiver_does_not_count_as_seen() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();

    // B is connected but reading some other conversation
    let (_conn_b, mut rx_b) = connect(&stack.presence, b);

    let message = stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("hi"))
        .await
        .unwrap();
    assert!(!message.seen);
    assert!(message.seen_at.is_none());

    // B is still notified on their personal connection
    let events_b = drain(&mut rx_b);
    assert_eq!(events_b.len(), 1);
    assert!(matches!(&events_b[0], ChatEvent::NewMessage(_)));
}

#[tokio::test]
async fn offline_receiver_sees_on_open() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();
    let (_conn_a, mut rx_a) = connect(&stack.presence, a);

    // B offline: message lands unseen
    let message = stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("hi"))
        .await
        .unwrap();
    assert!(!message.seen);
    drain(&mut rx_a);

    // B connects and opens the conversation
    let (_conn_b, _rx_b) = connect(&stack.presence, b);
    let seen = stack
        .seen_sync
        .mark_seen_on_open(b, conversation.id)
        .await
        .unwrap();
    assert_eq!(seen, vec![message.id]);

    // A receives exactly one batched seen event
    let events_a = drain(&mut rx_a);
    assert_eq!(events_a.len(), 1);
    match &events_a[0] {
        ChatEvent::MessagesSeen {
            seen_by,
            message_ids,
            ..
        } => {
            assert_eq!(*seen_by, b);
            assert_eq!(message_ids.as_slice(), &[message.id]);
        }
        other => panic!("expected messagesSeen, got {other:?}"),
    }
}

#[tokio::test]
async fn mark_seen_on_open_is_idempotent() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();
    let (_conn_a, mut rx_a) = connect(&stack.presence, a);

    stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("hi"))
        .await
        .unwrap();
    drain(&mut rx_a);

    let first = stack
        .seen_sync
        .mark_seen_on_open(b, conversation.id)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    drain(&mut rx_a);

    // second open with nothing new: empty result, no event
    let second = stack
        .seen_sync
        .mark_seen_on_open(b, conversation.id)
        .await
        .unwrap();
    assert!(second.is_empty());
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn seen_transition_is_monotonic() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();

    let (conn_b, _rx_b) = connect(&stack.presence, b);
    stack.presence.join_conversation(conversation.id, &conn_b);

    let message = stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("hi"))
        .await
        .unwrap();
    let original_seen_at = message.seen_at;
    assert!(message.seen);

    // a later open neither reverts nor re-stamps the transition
    let transitioned = stack
        .seen_sync
        .mark_seen_on_open(b, conversation.id)
        .await
        .unwrap();
    assert!(transitioned.is_empty());

    let stored = stack
        .messages
        .find_by_conversation(conversation.id)
        .await
        .unwrap();
    assert!(stored[0].seen);
    assert_eq!(stored[0].seen_at, original_seen_at);
}

#[tokio::test]
async fn delivery_updates_the_conversation_summary() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();

    stack
        .delivery
        .deliver(a, conversation.id, MessageContent::text("latest words"))
        .await
        .unwrap();

    let stored = stack
        .conversations
        .find_by_id(conversation.id)
        .await
        .unwrap()
        .unwrap();
    let latest = stored.latest_message.expect("summary should be set");
    assert_eq!(latest.text, "latest words");
    assert_eq!(latest.sender_id, a);
    assert!(stored.updated_at >= conversation.updated_at);
}

#[tokio::test]
async fn conversation_listing_enriches_counterparty_over_rpc() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    let conversation = stack.conversations.create_or_get(a, b).await.unwrap();

    // one unseen message from B toward A
    stack
        .delivery
        .deliver(b, conversation.id, MessageContent::text("hello"))
        .await
        .unwrap();

    // a user service behind the user queue
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let consumer = QueueConsumer::new(broker.clone(), 4);
    let actions = ActionTable::new().register("get_user_by_id", |data| async move {
        Ok(json!({
            "success": true,
            "status": 200,
            "data": { "id": data["userId"], "name": "Bea" },
        }))
    });
    consumer.bind("user.q", actions, false).await.unwrap();

    let rpc = Arc::new(RpcClient::new(broker, Duration::from_secs(2)));
    let chat = ChatService::new(
        stack.conversations.clone(),
        stack.messages.clone(),
        rpc,
        "user.q".into(),
    );

    let listing = chat.list_conversations(a).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].unseen_count, 1);
    let other = listing[0].other_user.as_ref().expect("profile enrichment");
    assert_eq!(other["name"], "Bea");
}

#[tokio::test]
async fn listing_degrades_when_the_user_service_is_down() {
    let stack = chat_stack();
    let (a, b) = (user(1), user(2));
    stack.conversations.create_or_get(a, b).await.unwrap();

    // nobody consumes the user queue: the profile lookup times out
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let rpc = Arc::new(RpcClient::new(broker, Duration::from_millis(100)));
    let chat = ChatService::new(
        stack.conversations.clone(),
        stack.messages.clone(),
        rpc,
        "user.q".into(),
    );

    let listing = chat.list_conversations(a).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert!(listing[0].other_user.is_none());
}
