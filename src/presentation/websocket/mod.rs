//! WebSocket endpoint for the real-time layer.

mod handler;

pub use handler::ws_handler;
