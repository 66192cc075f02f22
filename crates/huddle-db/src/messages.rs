use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use huddle_types::models::{Message, MessageTarget};

use crate::friends::blocked_either_way;
use crate::membership::{group_exists, membership, user_exists};
use crate::models::{self, opt_uuid_at, time_at, uuid_at};
use crate::reactions::attach_reactions;
use crate::{Database, Result, StoreError};

pub const MAX_PAGE: u32 = 200;

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.to_user_id, m.group_id, m.body, m.attachment, m.created_at, m.is_read";

/// Result of a read-marker request, with enough context to fan it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub target: MessageTarget,
    /// False when the message was already read.
    pub changed: bool,
}

impl Database {
    pub fn append_message(
        &self,
        sender: Uuid,
        target: MessageTarget,
        body: &str,
        attachment: Option<&str>,
    ) -> Result<Message> {
        self.append_message_at(sender, target, body, attachment, models::now())
    }

    pub fn append_message_at(
        &self,
        sender: Uuid,
        target: MessageTarget,
        body: &str,
        attachment: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Message> {
        if body.trim().is_empty() && attachment.is_none() {
            return Err(StoreError::InvalidInput("message needs text or an attachment".into()));
        }

        let id = Uuid::new_v4();
        self.with_tx(|tx| {
            // The target is re-resolved at send time: the sender may have left
            // the group (or the recipient vanished) since the draft was composed.
            let (to_user_id, group_id) = match target {
                MessageTarget::Group(group_id) => {
                    if !group_exists(tx, group_id)? || membership(tx, group_id, sender)?.is_none() {
                        return Err(StoreError::TargetNotFound);
                    }
                    (None, Some(group_id.to_string()))
                }
                MessageTarget::Direct(recipient) => {
                    if recipient == sender {
                        return Err(StoreError::InvalidInput("cannot message yourself".into()));
                    }
                    if !user_exists(tx, recipient)? {
                        return Err(StoreError::TargetNotFound);
                    }
                    if blocked_either_way(tx, sender, recipient)? {
                        return Err(StoreError::Forbidden);
                    }
                    (Some(recipient.to_string()), None)
                }
            };

            tx.execute(
                "INSERT INTO messages (id, sender_id, to_user_id, group_id, body, attachment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    sender.to_string(),
                    to_user_id,
                    group_id,
                    body,
                    attachment,
                    models::timestamp(created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(Message {
            id,
            sender_id: sender,
            target,
            body: body.to_string(),
            attachment: attachment.map(str::to_string),
            created_at,
            is_read: false,
            reactions: vec![],
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let Some(message) = query_message(conn, message_id)? else {
                return Ok(None);
            };
            let mut messages = vec![message];
            attach_reactions(conn, &mut messages)?;
            Ok(messages.pop())
        })
    }

    /// Snapshot of a conversation, oldest first.
    ///
    /// Returns at most `limit` messages (capped at [`MAX_PAGE`]) older than
    /// `before` when given.
    pub fn conversation(
        &self,
        caller: Uuid,
        target: MessageTarget,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, MAX_PAGE);

        self.with_conn(|conn| {
            let (before_at, before_seq) = match before {
                Some(id) => {
                    let (at, seq) = cursor_position(conn, id)?;
                    (Some(at), Some(seq))
                }
                None => (None, None),
            };
            let mut messages = match target {
                MessageTarget::Group(group_id) => {
                    crate::membership::require_member(conn, group_id, caller)?;
                    let sql = format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         WHERE m.group_id = ?1
                           AND (?2 IS NULL OR m.created_at < ?2 OR (m.created_at = ?2 AND m.seq < ?3))
                         ORDER BY m.created_at DESC, m.seq DESC
                         LIMIT ?4"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(
                        rusqlite::params![group_id.to_string(), before_at, before_seq, limit],
                        message_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                MessageTarget::Direct(other) => {
                    if !user_exists(conn, other)? {
                        return Err(StoreError::NotFound("user"));
                    }
                    let sql = format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages m
                         WHERE ((m.sender_id = ?1 AND m.to_user_id = ?2)
                             OR (m.sender_id = ?2 AND m.to_user_id = ?1))
                           AND (?3 IS NULL OR m.created_at < ?3 OR (m.created_at = ?3 AND m.seq < ?4))
                         ORDER BY m.created_at DESC, m.seq DESC
                         LIMIT ?5"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(
                        rusqlite::params![
                            caller.to_string(),
                            other.to_string(),
                            before_at,
                            before_seq,
                            limit
                        ],
                        message_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            messages.reverse();
            attach_reactions(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Marks a message read. Once set the flag never reverts.
    pub fn mark_read(&self, message_id: Uuid, reader: Uuid) -> Result<ReadReceipt> {
        self.with_tx(|tx| {
            let message = query_message(tx, message_id)?.ok_or(StoreError::NotFound("message"))?;
            if message.sender_id == reader || !can_access(tx, &message, reader)? {
                return Err(StoreError::Forbidden);
            }
            let changed = tx.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                [message_id.to_string()],
            )?;
            Ok(ReadReceipt {
                message_id,
                sender_id: message.sender_id,
                target: message.target,
                changed: changed == 1,
            })
        })
    }
}

/// `(created_at, seq)` of a pagination cursor.
fn cursor_position(conn: &Connection, message_id: Uuid) -> Result<(String, i64)> {
    conn.query_row(
        "SELECT created_at, seq FROM messages WHERE id = ?1",
        [message_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or(StoreError::NotFound("message"))
}

pub(crate) fn query_message(conn: &Connection, message_id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    let message = conn
        .query_row(&sql, [message_id.to_string()], message_from_row)
        .optional()?;
    Ok(message)
}

/// Whether `user` belongs to the conversation the message was sent in.
pub(crate) fn can_access(conn: &Connection, message: &Message, user: Uuid) -> Result<bool> {
    match message.target {
        MessageTarget::Group(group_id) => Ok(membership(conn, group_id, user)?.is_some()),
        MessageTarget::Direct(recipient) => Ok(user == recipient || user == message.sender_id),
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let to_user_id = opt_uuid_at(row, 2)?;
    let group_id = opt_uuid_at(row, 3)?;
    let target = match (group_id, to_user_id) {
        (Some(group_id), _) => MessageTarget::Group(group_id),
        (None, Some(user_id)) => MessageTarget::Direct(user_id),
        (None, None) => return Err(rusqlite::Error::InvalidColumnType(2, "to_user_id".into(), rusqlite::types::Type::Null)),
    };

    Ok(Message {
        id: uuid_at(row, 0)?,
        sender_id: uuid_at(row, 1)?,
        target,
        body: row.get(4)?,
        attachment: row.get(5)?,
        created_at: time_at(row, 6)?,
        is_read: row.get(7)?,
        reactions: vec![],
    })
}
