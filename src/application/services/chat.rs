//! Chat Service
//!
//! Conversation bookkeeping: creating/finding the thread for a pair of
//! users, listing a user's conversations (enriched with the counterparty
//! profile fetched from the user service over RPC), and reading message
//! history.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::ChatError;
use crate::domain::{Conversation, ConversationRepository, Message, MessageRepository};
use crate::infrastructure::broker::RpcClient;

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationOverview {
    #[serde(flatten)]
    pub conversation: Conversation,

    /// Counterparty profile from the user service; None when the lookup
    /// degraded
    pub other_user: Option<serde_json::Value>,

    /// Messages from the counterparty not yet seen
    pub unseen_count: i64,
}

/// Conversation bookkeeping service.
pub struct ChatService<C, M>
where
    C: ConversationRepository,
    M: MessageRepository,
{
    conversations: Arc<C>,
    messages: Arc<M>,
    rpc: Arc<RpcClient>,
    user_queue: String,
}

impl<C, M> ChatService<C, M>
where
    C: ConversationRepository,
    M: MessageRepository,
{
    pub fn new(
        conversations: Arc<C>,
        messages: Arc<M>,
        rpc: Arc<RpcClient>,
        user_queue: String,
    ) -> Self {
        Self {
            conversations,
            messages,
            rpc,
            user_queue,
        }
    }

    /// The conversation between two users, created on first intent.
    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        if user_id == other_user_id {
            return Err(ChatError::SelfConversation);
        }
        Ok(self.conversations.create_or_get(user_id, other_user_id).await?)
    }

    /// All conversations of a user, newest activity first, each with the
    /// counterparty profile and unseen count. A failed profile lookup
    /// degrades that row instead of failing the listing.
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationOverview>, ChatError> {
        let conversations = self.conversations.find_for_user(user_id).await?;
        let mut overviews = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let Some(other_id) = conversation.other_participant(user_id) else {
                continue;
            };
            let unseen_count = self.messages.count_unseen(conversation.id, other_id).await?;
            let other_user = match self
                .rpc
                .call(&self.user_queue, "get_user_by_id", json!({ "userId": other_id }))
                .await
            {
                Ok(reply) => reply.get("data").filter(|v| !v.is_null()).cloned(),
                Err(e) => {
                    warn!(user_id = %other_id, error = %e, "profile lookup degraded");
                    None
                }
            };
            overviews.push(ConversationOverview {
                conversation,
                other_user,
                unseen_count,
            });
        }

        Ok(overviews)
    }

    /// Message history of a conversation, oldest first. The viewer must
    /// be a participant.
    pub async fn get_messages(
        &self,
        viewer_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, ChatError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        if !conversation.has_participant(viewer_id) {
            return Err(ChatError::NotParticipant);
        }
        Ok(self.messages.find_by_conversation(conversation_id).await?)
    }
}
