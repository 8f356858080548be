//! Route Configuration
//!
//! Configures all HTTP routes for the gateway.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::presentation::middleware::auth_middleware;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(state.clone()))
        // Real-time endpoint
        .route("/ws", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness))
        .with_state(state)
}

/// API routes
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Public routes: the gateway forwards these over RPC
        .nest("/auth", auth_routes())
        // Protected routes (require authentication)
        .nest("/chat", chat_routes(state))
}

/// Authentication routes (public)
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/verify-otp", post(handlers::auth::verify_otp))
        .route("/resend-otp", post(handlers::auth::resend_otp))
        .route("/logout", post(handlers::auth::logout))
}

/// Chat routes (protected)
fn chat_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            post(handlers::chat::create_conversation).get(handlers::chat::list_conversations),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(handlers::chat::send_message).get(handlers::chat::get_messages),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
