use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use huddle_db::membership::MembershipOutcome;
use huddle_types::api::{
    AddMemberRequest, AvatarResponse, Claims, CreateGroupRequest, GroupResponse, MuteResponse,
    RemoveMemberResponse, RenameGroupRequest, UpdateThemeRequest,
};
use huddle_types::events::{GatewayEvent, Scope, ThemeTarget};

use crate::error::ApiError;
use crate::files::{FileKind, check_upload};
use crate::state::AppState;

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator = claims.sub;
    let (group, members) = state
        .db(move |db| db.create_group(creator, &req.name, &req.member_ids, req.avatar.as_deref()))
        .await?;

    // Subscribe first so the new members see their own GroupCreated.
    for member in &members {
        state.dispatcher.join_group(member.user.id, group.id).await;
    }
    state
        .dispatcher
        .publish(Scope::Group(group.id), &GatewayEvent::GroupCreated { group: group.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(GroupResponse { group, members })))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let groups = state.db(move |db| db.user_groups(user_id)).await?;
    Ok(Json(groups))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let former = state.db(move |db| db.delete_group(caller, group_id)).await?;
    info!("Group {} deleted by {} ({} members)", group_id, caller, former.len());

    state
        .dispatcher
        .publish(Scope::Group(group_id), &GatewayEvent::GroupDeleted { group_id })
        .await;
    state.dispatcher.drop_group(group_id).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let members = state.db(move |db| db.group_members(caller, group_id)).await?;
    Ok(Json(members))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let user = state
        .db(move |db| db.add_member(caller, group_id, req.user_id))
        .await?;

    state.dispatcher.join_group(user.id, group_id).await;
    state
        .dispatcher
        .publish(
            Scope::Group(group_id),
            &GatewayEvent::MemberAdded {
                group_id,
                user: user.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(user)))
}

/// DELETE /groups/{group_id}/members/{user_id}: admin removal, or leaving
/// when the caller removes themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let outcome = state
        .db(move |db| db.remove_member(caller, group_id, user_id))
        .await?;
    let MembershipOutcome::Removed {
        promoted,
        group_deleted,
    } = outcome
    else {
        error!("Unexpected outcome for member removal: {:?}", outcome);
        return Err(ApiError::Internal);
    };

    state.dispatcher.leave_group(user_id, group_id).await;
    state
        .dispatcher
        .publish_many(
            &[Scope::Group(group_id), Scope::User(user_id)],
            &GatewayEvent::MemberRemoved { group_id, user_id },
        )
        .await;

    if let Some(successor) = promoted {
        info!("Promoted {} to admin of group {} after removal of {}", successor, group_id, user_id);
        state
            .dispatcher
            .publish(
                Scope::Group(group_id),
                &GatewayEvent::AdminPromoted {
                    group_id,
                    user_id: successor,
                },
            )
            .await;
    }

    if group_deleted {
        info!("Group {} deleted after its last member left", group_id);
        state
            .dispatcher
            .publish(Scope::Group(group_id), &GatewayEvent::GroupDeleted { group_id })
            .await;
        state.dispatcher.drop_group(group_id).await;
    }

    Ok(Json(RemoveMemberResponse {
        group_deleted,
        promoted,
    }))
}

pub async fn promote_admin(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let outcome = state
        .db(move |db| db.promote_admin(caller, group_id, user_id))
        .await?;
    let changed = matches!(outcome, MembershipOutcome::Promoted { changed: true });

    if changed {
        state
            .dispatcher
            .publish(Scope::Group(group_id), &GatewayEvent::AdminPromoted { group_id, user_id })
            .await;
    }

    Ok(Json(serde_json::json!({ "changed": changed })))
}

pub async fn revoke_admin(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let outcome = state
        .db(move |db| db.revoke_admin(caller, group_id, user_id))
        .await?;
    let (changed, promoted) = match outcome {
        MembershipOutcome::Revoked { changed, promoted } => (changed, promoted),
        other => {
            error!("Unexpected outcome for admin revoke: {:?}", other);
            return Err(ApiError::Internal);
        }
    };

    if changed {
        state
            .dispatcher
            .publish(Scope::Group(group_id), &GatewayEvent::AdminRevoked { group_id, user_id })
            .await;
    }
    if let Some(successor) = promoted {
        info!("Promoted {} to admin of group {} after revoke of {}", successor, group_id, user_id);
        state
            .dispatcher
            .publish(
                Scope::Group(group_id),
                &GatewayEvent::AdminPromoted {
                    group_id,
                    user_id: successor,
                },
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "changed": changed, "promoted": promoted })))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RenameGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let group = state
        .db(move |db| db.rename_group(caller, group_id, &req.name))
        .await?;

    state
        .dispatcher
        .publish(
            Scope::Group(group_id),
            &GatewayEvent::GroupRenamed {
                group_id,
                name: group.name.clone(),
            },
        )
        .await;

    Ok(Json(group))
}

pub async fn update_theme(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateThemeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let theme = req.theme.trim().to_string();
    let stored = theme.clone();
    state
        .db(move |db| db.update_group_theme(caller, group_id, &stored))
        .await?;

    state
        .dispatcher
        .publish(
            Scope::Group(group_id),
            &GatewayEvent::ThemeChanged {
                target: ThemeTarget::Group(group_id),
                theme: theme.clone(),
            },
        )
        .await;

    Ok(Json(serde_json::json!({ "group_id": group_id, "theme": theme })))
}

/// PUT /groups/{group_id}/avatar: raw image bytes. The superseded file is
/// deleted once the new path is committed.
pub async fn update_avatar(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    check_upload(&bytes)?;

    let path = state.files.save(FileKind::Avatar, &bytes).await.map_err(|e| {
        error!("Failed to store avatar for group {}: {}", group_id, e);
        ApiError::Internal
    })?;

    let caller = claims.sub;
    let new_path = path.clone();
    let old = match state
        .db(move |db| db.update_group_avatar(caller, group_id, &new_path))
        .await
    {
        Ok(old) => old,
        Err(e) => {
            state.files.remove(&path).await;
            return Err(e);
        }
    };
    if let Some(old) = old {
        state.files.remove(&old).await;
    }

    state
        .dispatcher
        .publish(
            Scope::Group(group_id),
            &GatewayEvent::AvatarChanged {
                group_id,
                avatar_url: path.clone(),
            },
        )
        .await;

    Ok(Json(AvatarResponse {
        group_id,
        avatar_url: path,
    }))
}

pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let muted = state
        .db(move |db| db.toggle_group_mute(caller, group_id))
        .await?;

    state
        .dispatcher
        .publish(Scope::User(caller), &GatewayEvent::NotificationsMuted { group_id, muted })
        .await;

    Ok(Json(MuteResponse { group_id, muted }))
}

pub async fn non_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let friends = state
        .db(move |db| db.friends_not_in_group(caller, group_id))
        .await?;
    Ok(Json(friends))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use huddle_types::events::GatewayEvent;

    use crate::test_support::TestApp;

    async fn group_of_three(app: &TestApp) -> (Uuid, Uuid, Uuid, Uuid) {
        let alice = app.user("alice");
        let bob = app.user("bob");
        let carol = app.user("carol");
        let (status, body) = app
            .call(
                "POST",
                "/groups",
                alice,
                Some(json!({ "name": "trip", "member_ids": [alice, bob, carol] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let group_id: Uuid = serde_json::from_value(body["id"].clone()).unwrap();
        (group_id, alice, bob, carol)
    }

    fn as_uuid(value: &Value) -> Uuid {
        serde_json::from_value(value.clone()).unwrap()
    }

    #[tokio::test]
    async fn create_group_requires_three_members() {
        let app = TestApp::new();
        let alice = app.user("alice");
        let bob = app.user("bob");
        let (status, body) = app
            .call(
                "POST",
                "/groups",
                alice,
                Some(json!({ "name": "pair", "member_ids": [alice, bob] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("at least 3"));
    }

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let app = TestApp::new();
        let response = {
            use axum::body::Body;
            use axum::http::Request;
            use tower::ServiceExt;
            crate::router(app.state.clone())
                .oneshot(Request::builder().uri("/groups").body(Body::empty()).unwrap())
                .await
                .unwrap()
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn created_group_is_pushed_to_online_members() {
        let app = TestApp::new();
        let alice = app.user("alice");
        let bob = app.user("bob");
        let carol = app.user("carol");
        let (_conn, mut bob_rx) = app.state.dispatcher.register_session(bob).await;

        let (status, body) = app
            .call(
                "POST",
                "/groups",
                alice,
                Some(json!({ "name": "trip", "member_ids": [alice, bob, carol] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["members"].as_array().unwrap().len(), 3);

        let frame = bob_rx.try_recv().unwrap();
        let event: GatewayEvent = serde_json::from_str(&frame).unwrap();
        assert!(matches!(event, GatewayEvent::GroupCreated { group } if group.name == "trip"));
    }

    #[tokio::test]
    async fn sole_admin_leaving_promotes_earliest_member() {
        let app = TestApp::new();
        let (group_id, alice, bob, _carol) = group_of_three(&app).await;

        let (status, body) = app
            .call("DELETE", &format!("/groups/{group_id}/members/{alice}"), alice, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["group_deleted"], false);
        assert_eq!(as_uuid(&body["promoted"]), bob);

        let (status, members) = app
            .call("GET", &format!("/groups/{group_id}/members"), bob, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let admins: Vec<Uuid> = members
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["is_admin"] == true)
            .map(|m| as_uuid(&m["user"]["id"]))
            .collect();
        assert_eq!(admins, vec![bob]);
    }

    #[tokio::test]
    async fn non_admin_cannot_manage_members() {
        let app = TestApp::new();
        let (group_id, _alice, bob, carol) = group_of_three(&app).await;
        let dave = app.user("dave");

        let (status, _) = app
            .call(
                "POST",
                &format!("/groups/{group_id}/members"),
                bob,
                Some(json!({ "user_id": dave })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call("DELETE", &format!("/groups/{group_id}/members/{carol}"), bob, None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn revoking_sole_admin_hands_over_rights() {
        let app = TestApp::new();
        let (group_id, alice, bob, _carol) = group_of_three(&app).await;

        let (status, body) = app
            .call("DELETE", &format!("/groups/{group_id}/admins/{alice}"), alice, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);
        assert_eq!(as_uuid(&body["promoted"]), bob);
    }

    #[tokio::test]
    async fn removed_member_is_told_and_unsubscribed() {
        let app = TestApp::new();
        let (group_id, alice, _bob, carol) = group_of_three(&app).await;
        let (_conn, mut carol_rx) = app.state.dispatcher.register_session(carol).await;
        app.state.dispatcher.join_group(carol, group_id).await;

        let (status, _) = app
            .call("DELETE", &format!("/groups/{group_id}/members/{carol}"), alice, None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let frame = carol_rx.try_recv().unwrap();
        let event: GatewayEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event, GatewayEvent::MemberRemoved { group_id, user_id: carol });
        assert!(carol_rx.try_recv().is_err());
        assert!(!app.state.dispatcher.group_subscribers(group_id).await.contains(&carol));
    }

    #[tokio::test]
    async fn mute_toggle_goes_to_caller_only() {
        let app = TestApp::new();
        let (group_id, alice, bob, _carol) = group_of_three(&app).await;
        let (_a, mut alice_rx) = app.state.dispatcher.register_session(alice).await;
        let (_b, mut bob_rx) = app.state.dispatcher.register_session(bob).await;
        app.state.dispatcher.join_groups(bob, &[group_id]).await;

        let (status, body) = app
            .call("POST", &format!("/groups/{group_id}/mute"), alice, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["muted"], true);

        let event: GatewayEvent = serde_json::from_str(&alice_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::NotificationsMuted { group_id, muted: true });
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rename_and_delete_group() {
        let app = TestApp::new();
        let (group_id, alice, bob, _carol) = group_of_three(&app).await;

        let (status, body) = app
            .call(
                "PUT",
                &format!("/groups/{group_id}/name"),
                alice,
                Some(json!({ "name": "  road trip " })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "road trip");

        let (status, _) = app.call("DELETE", &format!("/groups/{group_id}"), bob, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.call("DELETE", &format!("/groups/{group_id}"), alice, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call("GET", &format!("/groups/{group_id}/members"), alice, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
