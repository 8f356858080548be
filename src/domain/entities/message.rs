//! Message entity and repository trait.
//!
//! Messages are immutable after creation except for the seen transition,
//! which is monotonic: `false -> true` exactly once, never back. The
//! repository enforces this with conditional updates so that a racing
//! `deliver` and bulk seen-sync cannot double-count or lose a message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Reference to an uploaded image object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(rename = "publicId")]
    pub public_id: String,
}

/// Message body: plain text or an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: String },
    Image { image: ImageRef },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Whether the content carries nothing deliverable.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::Image { image } => image.url.is_empty(),
        }
    }

    /// One-line summary used for the conversation's latest-message field.
    pub fn summary(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { .. } => "[image]".to_string(),
        }
    }
}

/// A single message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Primary key (time-ordered)
    pub id: Uuid,

    /// Owning conversation
    pub conversation_id: Uuid,

    /// Authoring participant
    pub sender_id: Uuid,

    /// Text or image body
    #[serde(flatten)]
    pub content: MessageContent,

    /// Whether the receiver has seen this message
    pub seen: bool,

    /// When the receiver saw it (set together with `seen`)
    pub seen_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message. `seen`/`seen_at` reflect the seen-on-arrival
    /// decision made by the delivery engine.
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        content: MessageContent,
        seen: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            content,
            seen,
            seen_at: seen.then_some(created_at),
            created_at,
        }
    }
}

/// Repository trait for Message data access operations.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Create a new message.
    async fn create(&self, message: &Message) -> Result<Message, AppError>;

    /// All messages of a conversation in creation order.
    async fn find_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>, AppError>;

    /// Transition every unseen message authored by `author_id` in the
    /// conversation to seen, all with the same `seen_at` timestamp, and
    /// return the ids that were transitioned. Must be a single
    /// conditional batch so the transition stays monotonic under
    /// concurrent inserts.
    async fn mark_seen_bulk(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Count unseen messages authored by `author_id` in the conversation.
    async fn count_unseen(&self, conversation_id: Uuid, author_id: Uuid)
        -> Result<i64, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_detection() {
        assert!(MessageContent::text("   ").is_empty());
        assert!(!MessageContent::text("hi").is_empty());
        assert!(MessageContent::Image {
            image: ImageRef {
                url: String::new(),
                public_id: String::new()
            }
        }
        .is_empty());
    }

    #[test]
    fn wire_shape_is_tagged_by_message_type() {
        let message = Message::new(
            Uuid::nil(),
            Uuid::nil(),
            MessageContent::text("hello"),
            false,
            Utc::now(),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["messageType"], "text");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["seen"], false);
        assert!(value["seenAt"].is_null());

        let image = Message::new(
            Uuid::nil(),
            Uuid::nil(),
            MessageContent::Image {
                image: ImageRef {
                    url: "https://cdn.example/a.png".into(),
                    public_id: "a".into(),
                },
            },
            true,
            Utc::now(),
        );
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["messageType"], "image");
        assert_eq!(value["image"]["publicId"], "a");
        assert!(value["seenAt"].is_string());
    }

    #[test]
    fn seen_on_arrival_sets_seen_at() {
        let now = Utc::now();
        let message = Message::new(Uuid::nil(), Uuid::nil(), MessageContent::text("x"), true, now);
        assert_eq!(message.seen_at, Some(now));
    }
}
