//! Real-time layer: event shapes and the presence registry.
//!
//! Kept separate from the WebSocket transport so the chat engines can
//! emit events through an injected registry rather than a socket-library
//! global.

pub mod events;
pub mod presence;

pub use events::{ChatEvent, ClientFrame};
pub use presence::{ConnectionId, PresenceRegistry};
