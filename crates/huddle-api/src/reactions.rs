use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use huddle_types::api::{AddReactionRequest, Claims};
use huddle_types::events::GatewayEvent;

use crate::error::ApiError;
use crate::messages::conversation_scopes;
use crate::state::AppState;

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let (message, reaction) = state
        .db(move |db| db.add_reaction(message_id, user_id, req.kind))
        .await?;

    state
        .dispatcher
        .publish_many(
            &conversation_scopes(message.sender_id, message.target),
            &GatewayEvent::ReactionAdded {
                message_id,
                reaction: reaction.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(reaction)))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let (message, removed) = state
        .db(move |db| db.remove_reaction(message_id, user_id))
        .await?;

    if removed {
        state
            .dispatcher
            .publish_many(
                &conversation_scopes(message.sender_id, message.target),
                &GatewayEvent::ReactionRemoved { message_id, user_id },
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "removed": removed })))
}
