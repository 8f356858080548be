//! Conversation delivery engine.
//!
//! Turns a send-message intent into a persisted message plus the
//! real-time events both parties expect. The seen-on-arrival decision is
//! made here, against the presence registry, at the moment of delivery:
//! a receiver who is online AND subscribed to this conversation has seen
//! the message the instant it exists.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::ChatError;
use crate::domain::{
    ConversationRepository, LatestMessage, Message, MessageContent, MessageRepository,
};
use crate::realtime::{ChatEvent, PresenceRegistry};

/// Delivery engine for two-party conversations.
pub struct DeliveryService<C, M>
where
    C: ConversationRepository,
    M: MessageRepository,
{
    conversations: Arc<C>,
    messages: Arc<M>,
    presence: Arc<PresenceRegistry>,
}

impl<C, M> DeliveryService<C, M>
where
    C: ConversationRepository,
    M: MessageRepository,
{
    pub fn new(conversations: Arc<C>, messages: Arc<M>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            conversations,
            messages,
            presence,
        }
    }

    /// Persist a new message and notify every interested party exactly
    /// once.
    pub async fn deliver(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: MessageContent,
    ) -> Result<Message, ChatError> {
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        let receiver_id = conversation
            .other_participant(sender_id)
            .ok_or(ChatError::NotParticipant)?;

        let seen_on_arrival = self.presence.is_viewing(receiver_id, conversation_id);
        let now = Utc::now();

        let message = Message::new(conversation_id, sender_id, content, seen_on_arrival, now);
        let message = self.messages.create(&message).await?;

        self.conversations
            .touch_latest(
                conversation_id,
                &LatestMessage {
                    text: message.content.summary(),
                    sender_id,
                },
                now,
            )
            .await?;

        // Three emission targets: the conversation's shared room, the
        // receiver's connection, the sender's connection. The registry
        // deduplicates coinciding targets, so each party gets the event
        // once even when they are also in the room.
        let mut targets = self.presence.room_members(conversation_id);
        if let Some(connection) = self.presence.lookup(receiver_id) {
            targets.push(connection);
        }
        if let Some(connection) = self.presence.lookup(sender_id) {
            targets.push(connection);
        }
        self.presence
            .send_to_connections(&targets, &ChatEvent::NewMessage(message.clone()));

        if seen_on_arrival {
            // same event shape as the deferred seen-sync path
            self.presence.send_to_user(
                sender_id,
                &ChatEvent::MessagesSeen {
                    conversation_id,
                    seen_by: receiver_id,
                    message_ids: vec![message.id],
                },
            );
        }

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            seen_on_arrival,
            "message delivered"
        );

        Ok(message)
    }
}
