use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Group, Message, Reaction, User};

/// Events sent over the WebSocket gateway.
///
/// Every push notification is one variant of this enum, so clients decode and
/// dispatch through a single `match`. Unknown `type` tags fail to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    GroupCreated { group: Group },

    MemberAdded { group_id: Uuid, user: User },

    MemberRemoved { group_id: Uuid, user_id: Uuid },

    AdminPromoted { group_id: Uuid, user_id: Uuid },

    AdminRevoked { group_id: Uuid, user_id: Uuid },

    GroupDeleted { group_id: Uuid },

    GroupRenamed { group_id: Uuid, name: String },

    ThemeChanged { target: ThemeTarget, theme: String },

    AvatarChanged { group_id: Uuid, avatar_url: String },

    /// Per-user mute toggle, only ever sent on the caller's own channel
    NotificationsMuted { group_id: Uuid, muted: bool },

    MessageReceived { message: Message },

    ReactionAdded { message_id: Uuid, reaction: Reaction },

    ReactionRemoved { message_id: Uuid, user_id: Uuid },

    MessageRead { message_id: Uuid },

    FriendRemoved { friend_id: Uuid },

    UserBlocked { blocked_user_id: Uuid },

    UserBlockedByOther { blocked_by_user_id: Uuid },
}

impl GatewayEvent {
    /// Wire name of the event, as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "Ready",
            Self::GroupCreated { .. } => "GroupCreated",
            Self::MemberAdded { .. } => "MemberAdded",
            Self::MemberRemoved { .. } => "MemberRemoved",
            Self::AdminPromoted { .. } => "AdminPromoted",
            Self::AdminRevoked { .. } => "AdminRevoked",
            Self::GroupDeleted { .. } => "GroupDeleted",
            Self::GroupRenamed { .. } => "GroupRenamed",
            Self::ThemeChanged { .. } => "ThemeChanged",
            Self::AvatarChanged { .. } => "AvatarChanged",
            Self::NotificationsMuted { .. } => "NotificationsMuted",
            Self::MessageReceived { .. } => "MessageReceived",
            Self::ReactionAdded { .. } => "ReactionAdded",
            Self::ReactionRemoved { .. } => "ReactionRemoved",
            Self::MessageRead { .. } => "MessageRead",
            Self::FriendRemoved { .. } => "FriendRemoved",
            Self::UserBlocked { .. } => "UserBlocked",
            Self::UserBlockedByOther { .. } => "UserBlockedByOther",
        }
    }
}

/// What a theme change applies to: a group chat or a one-to-one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ThemeTarget {
    Group(Uuid),
    Friend(Uuid),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}

/// Addressing target of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    Group(Uuid),
    User(Uuid),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidScope(pub String);

impl fmt::Display for InvalidScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scope: {}", self.0)
    }
}

impl std::error::Error for InvalidScope {}

impl FromStr for Scope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        let (prefix, id) = s.split_once(':').ok_or_else(|| InvalidScope(s.to_string()))?;
        let id: Uuid = id.parse().map_err(|_| InvalidScope(s.to_string()))?;
        match prefix {
            "group" => Ok(Self::Group(id)),
            "user" => Ok(Self::User(id)),
            _ => Err(InvalidScope(s.to_string())),
        }
    }
}
