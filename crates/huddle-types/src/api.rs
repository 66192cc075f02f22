use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Group, Member, MessageTarget, ReactionKind};

// -- JWT Claims --

/// JWT claims shared across huddle-api (REST middleware) and huddle-gateway
/// (WebSocket authentication). Tokens are minted by the external identity
/// provider; this workspace only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Groups --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupResponse {
    #[serde(flatten)]
    pub group: Group,
    pub members: Vec<Member>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateThemeRequest {
    pub theme: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub group_id: Uuid,
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarResponse {
    pub group_id: Uuid,
    pub avatar_url: String,
}

/// Outcome of a membership removal, so the caller can tell a plain removal
/// from one that repaired the admin set or emptied the group.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveMemberResponse {
    pub group_deleted: bool,
    pub promoted: Option<Uuid>,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub target: MessageTarget,
    #[serde(default)]
    pub body: String,
    /// File-store path previously returned by `POST /files`.
    #[serde(default)]
    pub attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: the id of the oldest message from the
    /// previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

// -- Reactions --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddReactionRequest {
    pub kind: ReactionKind,
}

// -- Files --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub size: u64,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
