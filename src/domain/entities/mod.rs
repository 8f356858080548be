//! Domain entities and their repository traits.

mod conversation;
mod message;
mod user;

pub use conversation::{Conversation, ConversationRepository, LatestMessage};
pub use message::{ImageRef, Message, MessageContent, MessageRepository};
pub use user::{AccountStatus, User, UserRepository, UserRole};
