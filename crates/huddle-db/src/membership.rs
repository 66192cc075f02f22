//! Group membership invariant engine.
//!
//! Every mutation of `group_members` goes through [`apply_membership_change`],
//! which restores the two group invariants before the surrounding transaction
//! commits:
//!
//! - a group with no members does not exist;
//! - a group with members has at least one admin.
//!
//! Successors are chosen by lowest membership `seq`, i.e. the longest-standing
//! member, so repairs are deterministic.

use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::models::MemberRow;
use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    AddMember(Uuid),
    RemoveMember(Uuid),
    PromoteAdmin(Uuid),
    RevokeAdmin(Uuid),
    DeleteGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOutcome {
    Added,
    Removed {
        /// Member promoted because the removed user was the last admin.
        promoted: Option<Uuid>,
        group_deleted: bool,
    },
    Promoted {
        changed: bool,
    },
    Revoked {
        changed: bool,
        promoted: Option<Uuid>,
    },
    Deleted,
}

pub fn apply_membership_change(
    tx: &Transaction<'_>,
    group_id: Uuid,
    op: MembershipOp,
) -> Result<MembershipOutcome> {
    match op {
        MembershipOp::AddMember(user_id) => add_member(tx, group_id, user_id),
        MembershipOp::RemoveMember(user_id) => remove_member(tx, group_id, user_id),
        MembershipOp::PromoteAdmin(user_id) => promote_admin(tx, group_id, user_id),
        MembershipOp::RevokeAdmin(user_id) => revoke_admin(tx, group_id, user_id),
        MembershipOp::DeleteGroup => {
            if !group_exists(tx, group_id)? {
                return Err(StoreError::NotFound("group"));
            }
            delete_group_cascade(tx, group_id)?;
            Ok(MembershipOutcome::Deleted)
        }
    }
}

fn add_member(tx: &Transaction<'_>, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
    if !group_exists(tx, group_id)? {
        return Err(StoreError::NotFound("group"));
    }
    if !user_exists(tx, user_id)? {
        return Err(StoreError::NotFound("user"));
    }
    if membership(tx, group_id, user_id)?.is_some() {
        return Err(StoreError::Conflict("user is already a member of this group".into()));
    }

    insert_membership(tx, group_id, user_id, false)?;
    Ok(MembershipOutcome::Added)
}

fn remove_member(tx: &Transaction<'_>, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
    membership(tx, group_id, user_id)?.ok_or(StoreError::NotFound("membership"))?;

    tx.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        (group_id.to_string(), user_id.to_string()),
    )?;

    if member_count(tx, group_id)? == 0 {
        delete_group_cascade(tx, group_id)?;
        info!("Group {} deleted as no members were left", group_id);
        return Ok(MembershipOutcome::Removed {
            promoted: None,
            group_deleted: true,
        });
    }

    let promoted = if admin_count(tx, group_id)? == 0 {
        let successor = first_member_excluding(tx, group_id, None)?;
        if let Some(successor) = successor {
            set_admin(tx, group_id, successor, true)?;
            info!(
                "User {} promoted to admin in group {} as no admins were left",
                successor, group_id
            );
        }
        successor
    } else {
        None
    };

    Ok(MembershipOutcome::Removed {
        promoted,
        group_deleted: false,
    })
}

fn promote_admin(tx: &Transaction<'_>, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
    let member = membership(tx, group_id, user_id)?.ok_or(StoreError::NotFound("membership"))?;
    if member.is_admin {
        return Ok(MembershipOutcome::Promoted { changed: false });
    }
    set_admin(tx, group_id, user_id, true)?;
    Ok(MembershipOutcome::Promoted { changed: true })
}

fn revoke_admin(tx: &Transaction<'_>, group_id: Uuid, user_id: Uuid) -> Result<MembershipOutcome> {
    let member = membership(tx, group_id, user_id)?.ok_or(StoreError::NotFound("membership"))?;
    if !member.is_admin {
        return Ok(MembershipOutcome::Revoked {
            changed: false,
            promoted: None,
        });
    }

    // Re-counted inside this transaction: two concurrent revokes serialize on
    // the write lock, so only one of them can observe "last admin".
    let promoted = if admin_count(tx, group_id)? == 1 {
        let successor = first_member_excluding(tx, group_id, Some(user_id))?
            .ok_or(StoreError::NoEligibleSuccessor)?;
        set_admin(tx, group_id, successor, true)?;
        info!(
            "User {} promoted to admin in group {} as the last admin was revoked",
            successor, group_id
        );
        Some(successor)
    } else {
        None
    };

    set_admin(tx, group_id, user_id, false)?;
    Ok(MembershipOutcome::Revoked {
        changed: true,
        promoted,
    })
}

// -- Building blocks shared with the group operations --

pub(crate) fn group_exists(conn: &Connection, group_id: Uuid) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_groups WHERE id = ?1",
            [group_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn user_exists(conn: &Connection, user_id: Uuid) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn membership(conn: &Connection, group_id: Uuid, user_id: Uuid) -> Result<Option<MemberRow>> {
    let sql = format!(
        "SELECT {} FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        MemberRow::COLUMNS
    );
    let row = conn
        .query_row(&sql, (group_id.to_string(), user_id.to_string()), MemberRow::from_row)
        .optional()?;
    Ok(row)
}

pub(crate) fn insert_membership(conn: &Connection, group_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?1, ?2, ?3)",
        (group_id.to_string(), user_id.to_string(), is_admin),
    )?;
    Ok(())
}

pub(crate) fn member_count(conn: &Connection, group_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
        [group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(crate) fn admin_count(conn: &Connection, group_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND is_admin = 1",
        [group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn set_admin(conn: &Connection, group_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<()> {
    conn.execute(
        "UPDATE group_members SET is_admin = ?3 WHERE group_id = ?1 AND user_id = ?2",
        (group_id.to_string(), user_id.to_string(), is_admin),
    )?;
    Ok(())
}

/// Longest-standing member of the group, optionally skipping one user.
fn first_member_excluding(conn: &Connection, group_id: Uuid, exclude: Option<Uuid>) -> Result<Option<Uuid>> {
    let excluded = exclude.map(|id| id.to_string()).unwrap_or_default();
    let sql = format!(
        "SELECT {} FROM group_members WHERE group_id = ?1 AND user_id <> ?2 ORDER BY seq ASC LIMIT 1",
        MemberRow::COLUMNS
    );
    let row = conn
        .query_row(&sql, (group_id.to_string(), excluded), MemberRow::from_row)
        .optional()?;
    Ok(row.map(|m| m.user_id))
}

/// Removes the group together with its memberships, messages and reactions.
fn delete_group_cascade(conn: &Connection, group_id: Uuid) -> Result<()> {
    let gid = group_id.to_string();
    conn.execute(
        "DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE group_id = ?1)",
        [&gid],
    )?;
    conn.execute("DELETE FROM messages WHERE group_id = ?1", [&gid])?;
    conn.execute("DELETE FROM group_members WHERE group_id = ?1", [&gid])?;
    conn.execute("DELETE FROM chat_groups WHERE id = ?1", [&gid])?;
    Ok(())
}

/// Fails with `NotFound` for a missing group and `Forbidden` unless `caller`
/// is an admin of it.
pub(crate) fn require_admin(conn: &Connection, group_id: Uuid, caller: Uuid) -> Result<MemberRow> {
    let member = require_member(conn, group_id, caller)?;
    if !member.is_admin {
        return Err(StoreError::Forbidden);
    }
    Ok(member)
}

pub(crate) fn require_member(conn: &Connection, group_id: Uuid, caller: Uuid) -> Result<MemberRow> {
    if !group_exists(conn, group_id)? {
        return Err(StoreError::NotFound("group"));
    }
    membership(conn, group_id, caller)?.ok_or(StoreError::Forbidden)
}
