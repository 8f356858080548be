//! Application services.

pub mod auth;
pub mod chat;
pub mod delivery;
pub mod mail;
pub mod seen_sync;

pub use auth::AuthService;
pub use chat::ChatService;
pub use delivery::DeliveryService;
pub use mail::MailService;
pub use seen_sync::SeenSyncService;

use crate::shared::error::AppError;

/// Chat-domain failures shared by the conversation services.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Sender is not a participant of this conversation")]
    NotParticipant,

    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("Message has no content")]
    EmptyMessage,

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::NotParticipant => {
                AppError::Forbidden("Not a participant of this conversation".into())
            }
            ChatError::ConversationNotFound => AppError::NotFound("Conversation not found".into()),
            ChatError::EmptyMessage => AppError::BadRequest("Message has no content".into()),
            ChatError::SelfConversation => {
                AppError::BadRequest("Cannot start a conversation with yourself".into())
            }
            ChatError::Storage(e) => e,
        }
    }
}
