use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use huddle_types::models::User;

use crate::groups::DEFAULT_THEME;
use crate::membership::user_exists;
use crate::models;
use crate::{Database, Result, StoreError};

impl Database {
    // -- Users --

    /// Users are owned by the identity provider; this only mirrors the record
    /// the chat core needs.
    pub fn create_user(&self, username: &str, avatar: Option<&str>) -> Result<User> {
        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            let taken = tx
                .query_row("SELECT 1 FROM users WHERE username = ?1", [username], |_| Ok(()))
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::Conflict(format!("username {username} is taken")));
            }
            tx.execute(
                "INSERT INTO users (id, username, avatar, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), username, avatar, models::timestamp(models::now())),
            )?;
            Ok(())
        })?;
        Ok(User {
            id,
            username: username.to_string(),
            avatar: avatar.map(str::to_string),
        })
    }

    // -- Friendships --

    pub fn add_friend(&self, user_id: Uuid, friend_id: Uuid) -> Result<()> {
        if user_id == friend_id {
            return Err(StoreError::InvalidInput("cannot befriend yourself".into()));
        }
        self.with_tx(|tx| {
            if !user_exists(tx, friend_id)? {
                return Err(StoreError::NotFound("user"));
            }
            if blocked_either_way(tx, user_id, friend_id)? {
                return Err(StoreError::Forbidden);
            }
            if are_friends(tx, user_id, friend_id)? {
                return Err(StoreError::Conflict("already friends".into()));
            }
            let now = models::timestamp(models::now());
            for (a, b) in [(user_id, friend_id), (friend_id, user_id)] {
                tx.execute(
                    "INSERT INTO friendships (user_id, friend_id, chat_theme, created_at) VALUES (?1, ?2, ?3, ?4)",
                    (a.to_string(), b.to_string(), DEFAULT_THEME, &now),
                )?;
            }
            Ok(())
        })
    }

    pub fn remove_friend(&self, user_id: Uuid, friend_id: Uuid) -> Result<()> {
        self.with_tx(|tx| {
            if !are_friends(tx, user_id, friend_id)? {
                return Err(StoreError::NotFound("friendship"));
            }
            delete_friendship(tx, user_id, friend_id)
        })
    }

    pub fn friends(&self, user_id: Uuid) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friendships f JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1 ORDER BY u.username ASC",
                models::USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| models::user_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The theme is shared by both sides of the conversation.
    pub fn update_friend_theme(&self, user_id: Uuid, friend_id: Uuid, theme: &str) -> Result<()> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(StoreError::InvalidInput("theme is required".into()));
        }
        self.with_tx(|tx| {
            if !are_friends(tx, user_id, friend_id)? {
                return Err(StoreError::NotFound("friendship"));
            }
            tx.execute(
                "UPDATE friendships SET chat_theme = ?3
                 WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
                (user_id.to_string(), friend_id.to_string(), theme),
            )?;
            Ok(())
        })
    }

    // -- Blocks --

    /// Blocking also ends the friendship.
    pub fn block_user(&self, blocker: Uuid, blocked: Uuid) -> Result<()> {
        if blocker == blocked {
            return Err(StoreError::InvalidInput("cannot block yourself".into()));
        }
        self.with_tx(|tx| {
            if !user_exists(tx, blocked)? {
                return Err(StoreError::NotFound("user"));
            }
            if has_blocked(tx, blocker, blocked)? {
                return Err(StoreError::Conflict("user is already blocked".into()));
            }
            tx.execute(
                "INSERT INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
                (blocker.to_string(), blocked.to_string(), models::timestamp(models::now())),
            )?;
            delete_friendship(tx, blocker, blocked)
        })
    }

    pub fn unblock_user(&self, blocker: Uuid, blocked: Uuid) -> Result<()> {
        let removed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                (blocker.to_string(), blocked.to_string()),
            )?)
        })?;
        if removed == 0 {
            return Err(StoreError::NotFound("block"));
        }
        Ok(())
    }

    pub fn is_blocked_either_way(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| blocked_either_way(conn, a, b))
    }
}

fn are_friends(conn: &Connection, user_id: Uuid, friend_id: Uuid) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
            (user_id.to_string(), friend_id.to_string()),
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn delete_friendship(conn: &Connection, a: Uuid, b: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM friendships
         WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
        (a.to_string(), b.to_string()),
    )?;
    Ok(())
}

fn has_blocked(conn: &Connection, blocker: Uuid, blocked: Uuid) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            (blocker.to_string(), blocked.to_string()),
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn blocked_either_way(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    Ok(has_blocked(conn, a, b)? || has_blocked(conn, b, a)?)
}
