use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use huddle_types::api::{Claims, MessageQuery, SendMessageRequest};
use huddle_types::events::{GatewayEvent, Scope};
use huddle_types::models::MessageTarget;

use crate::error::ApiError;
use crate::state::AppState;

/// Channels that see events about a message: the group, or both sides of a
/// direct conversation.
pub(crate) fn conversation_scopes(sender_id: Uuid, target: MessageTarget) -> Vec<Scope> {
    match target {
        MessageTarget::Group(group_id) => vec![Scope::Group(group_id)],
        MessageTarget::Direct(recipient) => vec![Scope::User(sender_id), Scope::User(recipient)],
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(path) = &req.attachment {
        if state.files.resolve(path).is_none() {
            warn!("Rejected message with invalid attachment path {:?}", path);
            return Err(ApiError::BadRequest("invalid attachment path".into()));
        }
    }

    let sender = claims.sub;
    let message = state
        .db(move |db| db.append_message(sender, req.target, &req.body, req.attachment.as_deref()))
        .await?;

    state
        .dispatcher
        .publish_many(
            &conversation_scopes(message.sender_id, message.target),
            &GatewayEvent::MessageReceived {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let target = MessageTarget::from_parts(&kind, id)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown conversation kind {kind}")))?;

    let caller = claims.sub;
    let MessageQuery { limit, before } = query;
    let messages = state
        .db(move |db| db.conversation(caller, target, limit, before))
        .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = claims.sub;
    let receipt = state.db(move |db| db.mark_read(message_id, reader)).await?;

    // Already-read messages are not re-announced.
    if receipt.changed {
        state
            .dispatcher
            .publish_many(
                &conversation_scopes(receipt.sender_id, receipt.target),
                &GatewayEvent::MessageRead { message_id },
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "message_id": message_id, "changed": receipt.changed })))
}
