pub mod error;
pub mod files;
pub mod friends;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All authenticated REST routes. The WebSocket gateway is mounted by the
/// server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Groups
        .route("/groups", post(groups::create_group).get(groups::list_groups))
        .route("/groups/{group_id}", delete(groups::delete_group))
        .route(
            "/groups/{group_id}/members",
            get(groups::list_members).post(groups::add_member),
        )
        .route("/groups/{group_id}/members/{user_id}", delete(groups::remove_member))
        .route(
            "/groups/{group_id}/admins/{user_id}",
            post(groups::promote_admin).delete(groups::revoke_admin),
        )
        .route("/groups/{group_id}/name", put(groups::rename_group))
        .route("/groups/{group_id}/theme", put(groups::update_theme))
        .route("/groups/{group_id}/avatar", put(groups::update_avatar))
        .route("/groups/{group_id}/mute", post(groups::toggle_mute))
        .route("/groups/{group_id}/non-members", get(groups::non_members))
        // Messages
        .route("/conversations/{kind}/{id}/messages", get(messages::get_conversation))
        .route("/messages", post(messages::send_message))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route(
            "/messages/{message_id}/reactions",
            post(reactions::add_reaction).delete(reactions::remove_reaction),
        )
        // Files
        .route("/files", post(files::upload_file))
        // Friends
        .route("/friends", get(friends::list_friends))
        .route(
            "/friends/{friend_id}",
            post(friends::add_friend).delete(friends::remove_friend),
        )
        .route("/friends/{friend_id}/theme", put(friends::update_theme))
        .route(
            "/blocks/{user_id}",
            post(friends::block_user).delete(friends::unblock_user),
        )
        .layer(DefaultBodyLimit::max(files::MAX_FILE_SIZE))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
