//! Deferred read-receipt sync.
//!
//! When a participant opens a conversation, every message the other
//! party sent that is still unseen transitions to seen in one batch, and
//! the author gets a single `messagesSeen` event naming all of them.
//! The batch is a conditional update in the storage layer, so it
//! composes safely with a concurrent `deliver` on the same conversation.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::ChatError;
use crate::domain::{ConversationRepository, MessageRepository};
use crate::realtime::{ChatEvent, PresenceRegistry};

/// Bulk seen-transition engine.
pub struct SeenSyncService<C, M>
where
    C: ConversationRepository,
    M: MessageRepository,
{
    conversations: Arc<C>,
    messages: Arc<M>,
    presence: Arc<PresenceRegistry>,
}

impl<C, M> SeenSyncService<C, M>
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

    /// Mark everything the other participant sent as seen and notify
    /// them once. Idempotent: a second open with nothing new returns an
    /// empty list and emits nothing.
    pub async fn mark_seen_on_open(
        &self,
        viewer_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, ChatError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        let author_id = conversation
            .other_participant(viewer_id)
            .ok_or(ChatError::NotParticipant)?;

        let seen_at = Utc::now();
        let message_ids = self
            .messages
            .mark_seen_bulk(conversation_id, author_id, seen_at)
            .await?;

        if !message_ids.is_empty() {
            // one event for the whole batch, not one per message
            self.presence.send_to_user(
                author_id,
                &ChatEvent::MessagesSeen {
                    conversation_id,
                    seen_by: viewer_id,
                    message_ids: message_ids.clone(),
                },
            );
            debug!(
                conversation_id = %conversation_id,
                viewer_id = %viewer_id,
                count = message_ids.len(),
                "messages marked seen on open"
            );
        }

        Ok(message_ids)
    }
}
