//! REST endpoints for direct messages: the conversation fetch clients use to
//! reconcile, and a request/response send path for clients without a live
//! connection.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::conversation::ConversationKey;
use crate::chat::relay::{self, RelayError};
use crate::chat::users::current_user;
use crate::db::Message;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::broadcast::Target;
use crate::ws::protocol::{MessageNotification, NewMessage, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub with: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// GET /api/v1/messages?with=<userId>
/// Full conversation between the caller and `with`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Vec<Message>> {
    let with = query
        .with
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing query params"))?;

    let me = current_user(&state, &claims).await?;
    let messages = state.store.conversation(&me.id, &with).await?;

    tracing::debug!(
        user_id = %me.id,
        conversation = %ConversationKey::new(&me.id, &with),
        count = messages.len(),
        "Conversation fetched"
    );
    Ok(Json(messages))
}

/// POST /api/v1/messages
/// Validate and persist, respond 201 with the durable record, then push it to
/// both participants and notify the receiver.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let receiver_id = body.receiver_id.unwrap_or_default();
    let content = relay::validate(
        &receiver_id,
        body.content.as_deref().unwrap_or_default(),
        state.max_content_chars,
    )?;

    let sender = state
        .store
        .find_user_by_external_id(&claims.sub)
        .await?
        .ok_or(RelayError::UnknownSender)?;

    let message = relay::persist(state.store.as_ref(), &sender.id, &receiver_id, &content).await?;

    tracing::info!(
        message_id = %message.id,
        sender_id = %message.sender_id,
        receiver_id = %message.receiver_id,
        "Message sent via REST"
    );

    state.router.deliver(
        Target::Conversation(ConversationKey::new(&message.sender_id, &message.receiver_id)),
        ServerEvent::NewMessage(NewMessage::durable(&message)),
    );
    state.router.deliver(
        Target::User(message.receiver_id.clone()),
        ServerEvent::MessageNotification(MessageNotification {
            message: message.clone(),
            from: sender,
        }),
    );

    Ok((StatusCode::CREATED, Json(message)))
}
