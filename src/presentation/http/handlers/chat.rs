//! Chat route handlers.
//!
//! Conversation CRUD plus message send/fetch. Sending accepts multipart
//! form data with a `text` field or an `image` file; images go through
//! the uploader capability before delivery. Fetching history as a
//! participant doubles as the conversation-open trigger for the seen
//! sync.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use crate::application::dto::{
    ConversationListResponse, ConversationResponse, CreateConversationRequest,
    MessageListResponse, MessageResponse,
};
use crate::domain::{ImageRef, MessageContent};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let conversation = state
        .chat_service()
        .create_conversation(user.user_id, body.other_user_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            success: true,
            conversation,
        }),
    ))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state.chat_service().list_conversations(user.user_id).await?;

    Ok(Json(ConversationListResponse {
        success: true,
        conversations,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut text: Option<String> = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed form data: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => {
                text = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Malformed text field: {e}")))?,
                );
            }
            Some("image") => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Malformed image field: {e}")))?;
                image = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let content = match image {
        Some((filename, bytes)) => {
            let stored = state.uploader.upload(bytes, &filename).await?;
            MessageContent::Image {
                image: ImageRef {
                    url: stored.url,
                    public_id: stored.id,
                },
            }
        }
        None => MessageContent::Text {
            text: text.unwrap_or_default(),
        },
    };

    let message = state
        .delivery_service()
        .deliver(user.user_id, conversation_id, content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message,
        }),
    ))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<MessageListResponse>, AppError> {
    // opening the conversation: flush the counterparty's unseen messages
    // first so the returned history reflects the transition
    let seen_message_ids = state
        .seen_sync_service()
        .mark_seen_on_open(user.user_id, conversation_id)
        .await?;
    let messages = state
        .chat_service()
        .get_messages(user.user_id, conversation_id)
        .await?;

    Ok(Json(MessageListResponse {
        success: true,
        messages,
        seen_message_ids,
    }))
}
