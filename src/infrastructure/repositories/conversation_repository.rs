//! Conversation Repository Implementation
//!
//! PostgreSQL implementation of conversation storage. The
//! unordered-pair uniqueness invariant rests on the canonical ordering
//! of `(participant_a, participant_b)` plus a unique constraint; the
//! upsert in [`create_or_get`] makes first-message races converge on a
//! single row.
//!
//! [`create_or_get`]: crate::domain::ConversationRepository::create_or_get

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Conversation, ConversationRepository, LatestMessage};
use crate::shared::error::AppError;

/// PostgreSQL conversation repository implementation.
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for conversation queries.
#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    participant_a: Uuid,
    participant_b: Uuid,
    latest_text: Option<String>,
    latest_sender: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        let latest_message = match (self.latest_text, self.latest_sender) {
            (Some(text), Some(sender_id)) => Some(LatestMessage { text, sender_id }),
            _ => None,
        };
        Conversation {
            id: self.id,
            participant_a: self.participant_a,
            participant_b: self.participant_b,
            latest_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, latest_text, latest_sender, created_at, updated_at";

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_conversation()))
    }

    async fn create_or_get(&self, x: Uuid, y: Uuid) -> Result<Conversation, AppError> {
        let (a, b) = Conversation::canonical_pair(x, y);
        let now = Utc::now();

        // the no-op DO UPDATE makes RETURNING yield the existing row on
        // conflict, so concurrent first messages converge on one thread
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            INSERT INTO conversations (id, participant_a, participant_b, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (participant_a, participant_b)
            DO UPDATE SET participant_a = EXCLUDED.participant_a
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(a)
        .bind(b)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_conversation())
    }

    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE participant_a = $1 OR participant_b = $1
            ORDER BY updated_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_conversation()).collect())
    }

    async fn touch_latest(
        &self,
        id: Uuid,
        latest: &LatestMessage,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET latest_text = $2, latest_sender = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&latest.text)
        .bind(latest.sender_id)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Conversation {} not found", id)));
        }

        Ok(())
    }
}
