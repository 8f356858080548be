//! Common Test Utilities
//!
//! In-memory repository fakes and helpers for driving the chat engines
//! without PostgreSQL.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use sayhi_server::application::services::{DeliveryService, SeenSyncService};
use sayhi_server::domain::{
    Conversation, ConversationRepository, LatestMessage, Message, MessageRepository,
};
use sayhi_server::realtime::{ChatEvent, ConnectionId, PresenceRegistry};
use sayhi_server::shared::error::AppError;

pub fn user(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemConversationRepository {
    items: Mutex<Vec<Conversation>>,
}

#[async_trait]
impl ConversationRepository for MemConversationRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn create_or_get(&self, x: Uuid, y: Uuid) -> Result<Conversation, AppError> {
        let (a, b) = Conversation::canonical_pair(x, y);
        let mut items = self.items.lock().unwrap();
        if let Some(existing) = items
            .iter()
            .find(|c| c.participant_a == a && c.participant_b == b)
        {
            return Ok(existing.clone());
        }
        let conversation = Conversation::between(x, y);
        items.push(conversation.clone());
        Ok(conversation)
    }

    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let mut found: Vec<Conversation> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.has_participant(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn touch_latest(
        &self,
        id: Uuid,
        latest: &LatestMessage,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut items = self.items.lock().unwrap();
        let conversation = items
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?;
        conversation.latest_message = Some(latest.clone());
        conversation.updated_at = updated_at;
        Ok(())
    }
}

/// In-memory message store with the same conditional seen-transition
/// semantics as the PostgreSQL implementation.
#[derive(Default)]
pub struct MemMessageRepository {
    items: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageRepository for MemMessageRepository {
    async fn create(&self, message: &Message) -> Result<Message, AppError> {
        self.items.lock().unwrap().push(message.clone());
        Ok(message.clone())
    }

    async fn find_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, AppError> {
        let mut found: Vec<Message> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn mark_seen_bulk(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut items = self.items.lock().unwrap();
        let mut transitioned = Vec::new();
        for message in items.iter_mut() {
            if message.conversation_id == conversation_id
                && message.sender_id == author_id
                && !message.seen
            {
                message.seen = true;
                message.seen_at = Some(seen_at);
                transitioned.push(message.id);
            }
        }
        Ok(transitioned)
    }

    async fn count_unseen(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
    ) -> Result<i64, AppError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.sender_id == author_id && !m.seen)
            .count() as i64)
    }
}

/// The chat engines wired to in-memory stores and a fresh registry.
pub struct ChatStack {
    pub presence: Arc<PresenceRegistry>,
    pub conversations: Arc<MemConversationRepository>,
    pub messages: Arc<MemMessageRepository>,
    pub delivery: DeliveryService<MemConversationRepository, MemMessageRepository>,
    pub seen_sync: SeenSyncService<MemConversationRepository, MemMessageRepository>,
}

pub fn chat_stack() -> ChatStack {
    let presence = Arc::new(PresenceRegistry::new());
    let conversations = Arc::new(MemConversationRepository::default());
    let messages = Arc::new(MemMessageRepository::default());
    ChatStack {
        delivery: DeliveryService::new(
            conversations.clone(),
            messages.clone(),
            presence.clone(),
        ),
        seen_sync: SeenSyncService::new(
            conversations.clone(),
            messages.clone(),
            presence.clone(),
        ),
        presence,
        conversations,
        messages,
    }
}

/// Attach a fake client connection for `user_id` and return its id plus
/// the event stream it would receive.
pub fn connect(
    presence: &PresenceRegistry,
    user_id: Uuid,
) -> (ConnectionId, mpsc::UnboundedReceiver<ChatEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (presence.register(user_id, tx), rx)
}

/// Pop everything currently queued on a connection's event stream.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
