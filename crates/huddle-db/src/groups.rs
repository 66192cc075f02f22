use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use huddle_types::models::{Group, GroupSummary, Member, User};

use crate::membership::{
    self, MembershipOp, MembershipOutcome, apply_membership_change, require_admin, require_member,
};
use crate::models::{self, GROUP_COLUMNS, USER_COLUMNS, group_from_row, user_from_row};
use crate::{Database, Result, StoreError};

/// Smallest group that can be created (creator included).
pub const MIN_GROUP_SIZE: usize = 3;

pub const DEFAULT_THEME: &str = "default";

impl Database {
    /// Create a group whose only admin is `creator`.
    pub fn create_group(
        &self,
        creator: Uuid,
        name: &str,
        member_ids: &[Uuid],
        avatar: Option<&str>,
    ) -> Result<(Group, Vec<Member>)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("group name is required".into()));
        }

        let mut seen = HashSet::new();
        let member_ids: Vec<Uuid> = member_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if member_ids.len() < MIN_GROUP_SIZE {
            return Err(StoreError::InvalidInput(format!(
                "a group must have at least {MIN_GROUP_SIZE} members"
            )));
        }
        if !member_ids.contains(&creator) {
            return Err(StoreError::InvalidInput(
                "the group creator must be a member of the group".into(),
            ));
        }

        let group_id = Uuid::new_v4();
        let group = self.with_tx(|tx| {
            let group = insert_group(tx, group_id, name, avatar)?;
            for user_id in &member_ids {
                if !membership::user_exists(tx, *user_id)? {
                    return Err(StoreError::NotFound("user"));
                }
                membership::insert_membership(tx, group_id, *user_id, *user_id == creator)?;
            }
            Ok(group)
        })?;

        info!("Group {} created with ID {}", group.name, group.id);
        let members = self.with_conn(|conn| query_members(conn, group_id))?;
        Ok((group, members))
    }

    pub fn get_group(&self, group_id: Uuid) -> Result<Option<Group>> {
        self.with_conn(|conn| query_group(conn, group_id))
    }

    /// Admin-only. Returns the newly added user.
    pub fn add_member(&self, caller: Uuid, group_id: Uuid, user_id: Uuid) -> Result<User> {
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            apply_membership_change(tx, group_id, MembershipOp::AddMember(user_id))?;
            query_user(tx, user_id)?.ok_or(StoreError::NotFound("user"))
        })
    }

    /// Admins may remove anyone; everyone may remove themselves (leave).
    pub fn remove_member(&self, caller: Uuid, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
        self.with_tx(|tx| {
            if caller != user_id {
                require_admin(tx, group_id, caller)?;
            } else if !membership::group_exists(tx, group_id)? {
                return Err(StoreError::NotFound("group"));
            }
            apply_membership_change(tx, group_id, MembershipOp::RemoveMember(user_id))
        })
    }

    pub fn leave_group(&self, caller: Uuid, group_id: Uuid) -> Result<MembershipOutcome> {
        self.remove_member(caller, group_id, caller)
    }

    pub fn promote_admin(&self, caller: Uuid, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            apply_membership_change(tx, group_id, MembershipOp::PromoteAdmin(user_id))
        })
    }

    pub fn revoke_admin(&self, caller: Uuid, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            apply_membership_change(tx, group_id, MembershipOp::RevokeAdmin(user_id))
        })
    }

    /// Admin-only. Returns the ids of the members the group had.
    pub fn delete_group(&self, caller: Uuid, group_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            let former = query_member_ids(tx, group_id)?;
            apply_membership_change(tx, group_id, MembershipOp::DeleteGroup)?;
            Ok(former)
        })
    }

    pub fn rename_group(&self, caller: Uuid, group_id: Uuid, name: &str) -> Result<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("group name is required".into()));
        }
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            tx.execute(
                "UPDATE chat_groups SET name = ?2 WHERE id = ?1",
                (group_id.to_string(), name),
            )?;
            query_group(tx, group_id)?.ok_or(StoreError::NotFound("group"))
        })
    }

    pub fn update_group_theme(&self, caller: Uuid, group_id: Uuid, theme: &str) -> Result<()> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(StoreError::InvalidInput("theme is required".into()));
        }
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            tx.execute(
                "UPDATE chat_groups SET chat_theme = ?2 WHERE id = ?1",
                (group_id.to_string(), theme),
            )?;
            Ok(())
        })
    }

    /// Admin-only. Returns the superseded avatar path, if any.
    pub fn update_group_avatar(&self, caller: Uuid, group_id: Uuid, avatar: &str) -> Result<Option<String>> {
        self.with_tx(|tx| {
            require_admin(tx, group_id, caller)?;
            let old: Option<String> = tx.query_row(
                "SELECT avatar FROM chat_groups WHERE id = ?1",
                [group_id.to_string()],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE chat_groups SET avatar = ?2 WHERE id = ?1",
                (group_id.to_string(), avatar),
            )?;
            Ok(old)
        })
    }

    /// Flips the caller's mute flag and returns the new value.
    pub fn toggle_group_mute(&self, caller: Uuid, group_id: Uuid) -> Result<bool> {
        self.with_tx(|tx| {
            let member = membership::membership(tx, group_id, caller)?
                .ok_or(StoreError::NotFound("membership"))?;
            let muted = !member.notifications_muted;
            tx.execute(
                "UPDATE group_members SET notifications_muted = ?3 WHERE group_id = ?1 AND user_id = ?2",
                (group_id.to_string(), caller.to_string(), muted),
            )?;
            Ok(muted)
        })
    }

    /// Members of a group, visible to members only.
    pub fn group_members(&self, caller: Uuid, group_id: Uuid) -> Result<Vec<Member>> {
        self.with_conn(|conn| {
            require_member(conn, group_id, caller)?;
            query_members(conn, group_id)
        })
    }

    pub fn member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| query_member_ids(conn, group_id))
    }

    pub fn user_groups(&self, user_id: Uuid) -> Result<Vec<GroupSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_COLUMNS}, gm.notifications_muted
                 FROM chat_groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = ?1
                 ORDER BY g.created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(GroupSummary {
                        group: group_from_row(row, 0)?,
                        notifications_muted: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn group_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT group_id FROM group_members WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| models::uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// The caller's friends who could be invited to the group.
    pub fn friends_not_in_group(&self, caller: Uuid, group_id: Uuid) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            require_member(conn, group_id, caller)?;
            let sql = format!(
                "SELECT {USER_COLUMNS}
                 FROM friendships f
                 JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1
                   AND f.friend_id NOT IN (SELECT user_id FROM group_members WHERE group_id = ?2)
                 ORDER BY u.username ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((caller.to_string(), group_id.to_string()), |row| user_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn insert_group(conn: &Connection, id: Uuid, name: &str, avatar: Option<&str>) -> Result<Group> {
    let created_at = models::now();
    conn.execute(
        "INSERT INTO chat_groups (id, name, avatar, chat_theme, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        (id.to_string(), name, avatar, DEFAULT_THEME, models::timestamp(created_at)),
    )?;
    Ok(Group {
        id,
        name: name.to_string(),
        avatar: avatar.map(str::to_string),
        chat_theme: DEFAULT_THEME.to_string(),
        created_at,
    })
}

fn query_group(conn: &Connection, group_id: Uuid) -> Result<Option<Group>> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM chat_groups g WHERE g.id = ?1");
    let group = conn
        .query_row(&sql, [group_id.to_string()], |row| group_from_row(row, 0))
        .optional()?;
    Ok(group)
}

pub(crate) fn query_user(conn: &Connection, user_id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
    let user = conn
        .query_row(&sql, [user_id.to_string()], |row| user_from_row(row, 0))
        .optional()?;
    Ok(user)
}

fn query_members(conn: &Connection, group_id: Uuid) -> Result<Vec<Member>> {
    let sql = format!(
        "SELECT {USER_COLUMNS}, gm.is_admin, gm.notifications_muted
         FROM group_members gm
         JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = ?1
         ORDER BY gm.seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([group_id.to_string()], |row| {
            Ok(Member {
                user: user_from_row(row, 0)?,
                is_admin: row.get(3)?,
                notifications_muted: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_member_ids(conn: &Connection, group_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY seq ASC")?;
    let ids = stmt
        .query_map([group_id.to_string()], |row| models::uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}
