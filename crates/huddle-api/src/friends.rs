use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use huddle_types::api::{Claims, UpdateThemeRequest};
use huddle_types::events::{GatewayEvent, Scope, ThemeTarget};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let friends = state.db(move |db| db.friends(user_id)).await?;
    Ok(Json(friends))
}

pub async fn add_friend(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    state.db(move |db| db.add_friend(user_id, friend_id)).await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_friend(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    state.db(move |db| db.remove_friend(user_id, friend_id)).await?;

    // Each side is told about the other.
    let dispatcher = &state.dispatcher;
    dispatcher
        .publish(Scope::User(user_id), &GatewayEvent::FriendRemoved { friend_id })
        .await;
    dispatcher
        .publish(
            Scope::User(friend_id),
            &GatewayEvent::FriendRemoved { friend_id: user_id },
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_theme(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateThemeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let theme = req.theme.trim().to_string();
    let stored = theme.clone();
    state
        .db(move |db| db.update_friend_theme(user_id, friend_id, &stored))
        .await?;

    let dispatcher = &state.dispatcher;
    dispatcher
        .publish(
            Scope::User(user_id),
            &GatewayEvent::ThemeChanged {
                target: ThemeTarget::Friend(friend_id),
                theme: theme.clone(),
            },
        )
        .await;
    dispatcher
        .publish(
            Scope::User(friend_id),
            &GatewayEvent::ThemeChanged {
                target: ThemeTarget::Friend(user_id),
                theme: theme.clone(),
            },
        )
        .await;

    Ok(Json(serde_json::json!({ "friend_id": friend_id, "theme": theme })))
}

pub async fn block_user(
    State(state): State<AppState>,
    Path(blocked): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let blocker = claims.sub;
    state.db(move |db| db.block_user(blocker, blocked)).await?;
    info!("User {} blocked {}", blocker, blocked);

    let dispatcher = &state.dispatcher;
    dispatcher
        .publish(
            Scope::User(blocker),
            &GatewayEvent::UserBlocked {
                blocked_user_id: blocked,
            },
        )
        .await;
    dispatcher
        .publish(
            Scope::User(blocked),
            &GatewayEvent::UserBlockedByOther {
                blocked_by_user_id: blocker,
            },
        )
        .await;

    Ok(StatusCode::CREATED)
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(blocked): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let blocker = claims.sub;
    state.db(move |db| db.unblock_user(blocker, blocked)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use huddle_types::events::GatewayEvent;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn block_notifies_both_sides_and_stops_direct_messages() {
        let app = TestApp::new();
        let alice = app.user("alice");
        let bob = app.user("bob");
        let (_a, mut alice_rx) = app.state.dispatcher.register_session(alice).await;
        let (_b, mut bob_rx) = app.state.dispatcher.register_session(bob).await;

        let (status, _) = app.call("POST", &format!("/blocks/{bob}"), alice, None).await;
        assert_eq!(status, StatusCode::CREATED);

        let event: GatewayEvent = serde_json::from_str(&alice_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::UserBlocked { blocked_user_id: bob });
        let event: GatewayEvent = serde_json::from_str(&bob_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::UserBlockedByOther { blocked_by_user_id: alice });

        let (status, _) = app
            .call(
                "POST",
                "/messages",
                bob,
                Some(json!({ "target": { "kind": "direct", "id": alice }, "body": "hey" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.call("POST", &format!("/blocks/{bob}"), alice, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app.call("DELETE", &format!("/blocks/{bob}"), alice, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn friend_removal_tells_each_side_about_the_other() {
        let app = TestApp::new();
        let alice = app.user("alice");
        let bob = app.user("bob");
        let (status, _) = app.call("POST", &format!("/friends/{bob}"), alice, None).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app.call("GET", "/friends", bob, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], json!(alice));
        assert_eq!(body[0]["username"], "alice");

        let (_a, mut alice_rx) = app.state.dispatcher.register_session(alice).await;
        let (_b, mut bob_rx) = app.state.dispatcher.register_session(bob).await;

        let (status, _) = app.call("DELETE", &format!("/friends/{alice}"), bob, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let event: GatewayEvent = serde_json::from_str(&bob_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::FriendRemoved { friend_id: alice });
        let event: GatewayEvent = serde_json::from_str(&alice_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::FriendRemoved { friend_id: bob });

        let (status, _) = app.call("DELETE", &format!("/friends/{alice}"), bob, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.call("GET", "/friends", alice, None).await;
        assert_eq!(body, json!([]));
    }
}
