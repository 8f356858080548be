//! WebSocket Connection Handler
//!
//! Authenticates the upgrade, registers the connection with the
//! presence registry, forwards chat events out, and handles the
//! join/leave frames that drive conversation subscriptions and the
//! seen sync.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::ConversationRepository;
use crate::presentation::middleware::auth::decode_token;
use crate::realtime::{ChatEvent, ClientFrame};
use crate::shared::error::AppError;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// WebSocket upgrade handler. The token travels as a query parameter
/// because browsers cannot set headers on WebSocket requests.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = decode_token(&query.token, &state.settings.jwt.secret)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.user_id)))
}

/// Handle one authenticated connection until it closes.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // Channel feeding the write half; the presence registry holds the
    // sending side
    let (tx, mut rx) = mpsc::unbounded_channel::<ChatEvent>();
    let connection_id = state.presence.register(user_id, tx);

    tracing::info!(user_id = %user_id, connection_id = %connection_id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => handle_frame(frame, &state, user_id, &connection_id).await,
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "unparseable frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "socket error");
                break;
            }
            _ => {}
        }
    }

    state.presence.set_offline(&connection_id);
    writer.abort();
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "client disconnected");
}

async fn handle_frame(frame: ClientFrame, state: &AppState, user_id: Uuid, connection_id: &str) {
    match frame {
        ClientFrame::JoinConversation { conversation_id } => {
            // only participants may subscribe to a conversation's events
            let conversation = match state.conversations().find_by_id(conversation_id).await {
                Ok(Some(conversation)) if conversation.has_participant(user_id) => conversation,
                Ok(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        conversation_id = %conversation_id,
                        "join rejected"
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "join lookup failed");
                    return;
                }
            };

            // join first so messages racing with the open are seen on
            // arrival; then flush everything that predates the open
            state
                .presence
                .join_conversation(conversation.id, connection_id);
            if let Err(e) = state
                .seen_sync_service()
                .mark_seen_on_open(user_id, conversation_id)
                .await
            {
                tracing::error!(error = %e, "seen sync on open failed");
            }
        }
        ClientFrame::LeaveConversation { conversation_id } => {
            state
                .presence
                .leave_conversation(conversation_id, connection_id);
        }
    }
}
