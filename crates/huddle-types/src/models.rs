use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// Relative file-store path, e.g. `avatars/<id>`.
    pub avatar: Option<String>,
    pub chat_theme: String,
    pub created_at: DateTime<Utc>,
}

/// A group as seen by one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub notifications_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    pub is_admin: bool,
    pub notifications_muted: bool,
}

/// Where a message is addressed: a single user or a whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageTarget {
    Direct(Uuid),
    Group(Uuid),
}

impl MessageTarget {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Direct(id) | Self::Group(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Group(_) => "group",
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "direct" => Some(Self::Direct(id)),
            "group" => Some(Self::Group(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub target: MessageTarget,
    pub body: String,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub kind: ReactionKind,
    pub created_at: DateTime<Utc>,
}

/// The fixed palette offered by the reaction picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Smile,
    Laugh,
    Love,
    Sad,
    Angry,
    ThumbsUp,
    ThumbsDown,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 7] = [
        Self::Smile,
        Self::Laugh,
        Self::Love,
        Self::Sad,
        Self::Angry,
        Self::ThumbsUp,
        Self::ThumbsDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smile => "smile",
            Self::Laugh => "laugh",
            Self::Love => "love",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::ThumbsUp => "thumbs_up",
            Self::ThumbsDown => "thumbs_down",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Smile => "😊",
            Self::Laugh => "😂",
            Self::Love => "😍",
            Self::Sad => "😢",
            Self::Angry => "😡",
            Self::ThumbsUp => "👍",
            Self::ThumbsDown => "👎",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReaction(pub String);

impl fmt::Display for UnknownReaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reaction kind: {}", self.0)
    }
}

impl std::error::Error for UnknownReaction {}

impl FromStr for ReactionKind {
    type Err = UnknownReaction;

    /// Accepts either the snake_case name or the emoji itself.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.symbol() == s)
            .ok_or_else(|| UnknownReaction(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_kind_parses_name_and_symbol() {
        assert_eq!("thumbs_up".parse::<ReactionKind>().unwrap(), ReactionKind::ThumbsUp);
        assert_eq!("😂".parse::<ReactionKind>().unwrap(), ReactionKind::Laugh);
        assert!("🦀".parse::<ReactionKind>().is_err());
    }

    #[test]
    fn message_target_wire_shape() {
        let id = Uuid::nil();
        let json = serde_json::to_value(MessageTarget::Group(id)).unwrap();
        assert_eq!(json["kind"], "group");
        assert_eq!(json["id"], id.to_string());
        assert_eq!(MessageTarget::from_parts("direct", id), Some(MessageTarget::Direct(id)));
        assert_eq!(MessageTarget::from_parts("channel", id), None);
    }
}
