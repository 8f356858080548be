//! Message Repository Implementation
//!
//! PostgreSQL implementation of message storage. The seen transition is
//! only ever performed through conditional updates guarded by
//! `seen = FALSE`, which keeps it monotonic regardless of how a
//! concurrent `deliver` and seen-sync interleave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ImageRef, Message, MessageContent, MessageRepository};
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    message_type: String,
    text: Option<String>,
    image_url: Option<String>,
    image_id: Option<String>,
    seen: bool,
    seen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Message {
        let content = match self.message_type.as_str() {
            "image" => MessageContent::Image {
                image: ImageRef {
                    url: self.image_url.unwrap_or_default(),
                    public_id: self.image_id.unwrap_or_default(),
                },
            },
            _ => MessageContent::Text {
                text: self.text.unwrap_or_default(),
            },
        };
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content,
            seen: self.seen,
            seen_at: self.seen_at,
            created_at: self.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, message_type, text, image_url, \
                               image_id, seen, seen_at, created_at";

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: &Message) -> Result<Message, AppError> {
        let (message_type, text, image_url, image_id) = match &message.content {
            MessageContent::Text { text } => ("text", Some(text.as_str()), None, None),
            MessageContent::Image { image } => (
                "image",
                None,
                Some(image.url.as_str()),
                Some(image.public_id.as_str()),
            ),
        };

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, message_type, text,
                                  image_url, image_id, seen, seen_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message_type)
        .bind(text)
        .bind(image_url)
        .bind(image_id)
        .bind(message.seen)
        .bind(message.seen_at)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_message())
    }

    async fn find_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    async fn mark_seen_bulk(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        // one conditional batch: a message mid-insert lands in either
        // this batch or the next open, never both
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE messages
            SET seen = TRUE, seen_at = $3
            WHERE conversation_id = $1 AND sender_id = $2 AND seen = FALSE
            RETURNING id
            "#,
        )
        .bind(conversation_id)
        .bind(author_id)
        .bind(seen_at)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn count_unseen(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE conversation_id = $1 AND sender_id = $2 AND seen = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
