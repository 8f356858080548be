//! Conversation entity and repository trait.
//!
//! A conversation is a two-party thread. At most one conversation exists
//! for any unordered pair of users; the invariant is enforced by storing
//! the pair in canonical order and constraining it unique.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Denormalized summary of the newest message, shown in conversation lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessage {
    pub text: String,
    pub sender_id: Uuid,
}

/// A two-party conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Primary key
    pub id: Uuid,

    /// First participant (canonically the smaller id)
    pub participant_a: Uuid,

    /// Second participant
    pub participant_b: Uuid,

    /// Summary of the newest message, None before the first message
    pub latest_message: Option<LatestMessage>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Bumped on every new message
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Canonical ordering for an unordered participant pair.
    pub fn canonical_pair(x: Uuid, y: Uuid) -> (Uuid, Uuid) {
        if x <= y {
            (x, y)
        } else {
            (y, x)
        }
    }

    /// Build a new conversation between two users.
    pub fn between(x: Uuid, y: Uuid) -> Self {
        let (participant_a, participant_b) = Self::canonical_pair(x, y);
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            participant_a,
            participant_b,
            latest_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.participant_a, self.participant_b]
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The counterparty of `user_id`, or None if `user_id` is not a
    /// participant of this conversation.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.participant_a == user_id {
            Some(self.participant_b)
        } else if self.participant_b == user_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

/// Repository trait for Conversation data access operations.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Find a conversation by primary key.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, AppError>;

    /// Get the conversation for an unordered pair of users, creating it
    /// if it does not exist yet. Atomic with respect to concurrent calls
    /// for the same pair.
    async fn create_or_get(&self, x: Uuid, y: Uuid) -> Result<Conversation, AppError>;

    /// All conversations a user participates in, most recently updated first.
    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError>;

    /// Update the latest-message summary and bump `updated_at`.
    async fn touch_latest(
        &self,
        id: Uuid,
        latest: &LatestMessage,
        updated_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Uuid, Uuid) {
        (
            Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap(),
        )
    }

    #[test]
    fn canonical_pair_is_order_independent() {
        let (a, b) = pair();
        assert_eq!(
            Conversation::canonical_pair(a, b),
            Conversation::canonical_pair(b, a)
        );
    }

    #[test]
    fn between_stores_canonical_order() {
        let (a, b) = pair();
        let conversation = Conversation::between(b, a);
        assert_eq!(conversation.participant_a, a);
        assert_eq!(conversation.participant_b, b);
    }

    #[test]
    fn other_participant() {
        let (a, b) = pair();
        let conversation = Conversation::between(a, b);
        assert_eq!(conversation.other_participant(a), Some(b));
        assert_eq!(conversation.other_participant(b), Some(a));
        assert_eq!(conversation.other_participant(Uuid::nil()), None);
    }
}
