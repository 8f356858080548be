//! Real-time event and client-frame wire shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Message;

/// Events pushed to connected clients.
///
/// Both the seen-on-arrival path and the deferred seen-sync path emit
/// the same `messagesSeen` shape, so clients reconcile read state
/// through one code path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ChatEvent {
    #[serde(rename = "newMessage")]
    NewMessage(Message),

    #[serde(rename = "messagesSeen")]
    MessagesSeen {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
        #[serde(rename = "seenBy")]
        seen_by: Uuid,
        #[serde(rename = "messageIds")]
        message_ids: Vec<Uuid>,
    },
}

impl ChatEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage(_) => "newMessage",
            ChatEvent::MessagesSeen { .. } => "messagesSeen",
        }
    }
}

/// Frames clients send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Subscribe to a conversation's events; also the "conversation
    /// open" trigger for the seen sync.
    #[serde(rename = "joinConversation")]
    JoinConversation {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },

    #[serde(rename = "leaveConversation")]
    LeaveConversation {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },
}
