//! Outgoing response bodies for the chat routes.

use serde::Serialize;
use uuid::Uuid;

use crate::application::services::chat::ConversationOverview;
use crate::domain::{Conversation, Message};

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub success: bool,
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub success: bool,
    pub conversations: Vec<ConversationOverview>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    /// Ids transitioned to seen by this fetch (the conversation-open
    /// trigger)
    pub seen_message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: Message,
}
