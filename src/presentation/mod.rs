//! # Presentation Layer
//!
//! Gateway HTTP routes, middleware, and the WebSocket endpoint.

pub mod http;
pub mod middleware;
pub mod websocket;
