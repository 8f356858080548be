//! PostgreSQL repository implementations.

mod conversation_repository;
mod message_repository;
mod user_repository;

pub use conversation_repository::PgConversationRepository;
pub use message_repository::PgMessageRepository;
pub use user_repository::PgUserRepository;
