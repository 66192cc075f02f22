use std::collections::HashMap;

use rusqlite::Connection;
use rusqlite::types::Type;
use uuid::Uuid;

use huddle_types::models::{Message, Reaction, ReactionKind};

use crate::messages::{can_access, query_message};
use crate::models::{self, time_at, uuid_at};
use crate::{Database, Result, StoreError};

impl Database {
    /// Sets the user's reaction on a message, replacing only that user's
    /// previous reaction.
    pub fn add_reaction(&self, message_id: Uuid, user_id: Uuid, kind: ReactionKind) -> Result<(Message, Reaction)> {
        let reaction = Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            kind,
            created_at: models::now(),
        };

        let message = self.with_tx(|tx| {
            let message = query_message(tx, message_id)?.ok_or(StoreError::NotFound("message"))?;
            if !can_access(tx, &message, user_id)? {
                return Err(StoreError::Forbidden);
            }
            tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                (message_id.to_string(), user_id.to_string()),
            )?;
            tx.execute(
                "INSERT INTO reactions (id, message_id, user_id, kind, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    reaction.id.to_string(),
                    message_id.to_string(),
                    user_id.to_string(),
                    kind.as_str(),
                    models::timestamp(reaction.created_at),
                ),
            )?;
            Ok(message)
        })?;

        Ok((message, reaction))
    }

    /// Returns the message and whether a reaction was actually removed.
    pub fn remove_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<(Message, bool)> {
        self.with_tx(|tx| {
            let message = query_message(tx, message_id)?.ok_or(StoreError::NotFound("message"))?;
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                (message_id.to_string(), user_id.to_string()),
            )?;
            Ok((message, removed > 0))
        })
    }
}

/// Fill in `reactions` for each message, dropping reactions from users who
/// are no longer part of the conversation.
pub(crate) fn attach_reactions(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let placeholders: Vec<String> = (1..=messages.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT r.id, r.message_id, r.user_id, r.kind, r.created_at
         FROM reactions r
         JOIN messages m ON m.id = r.message_id
         WHERE r.message_id IN ({})
           AND (
                (m.group_id IS NOT NULL AND EXISTS (
                    SELECT 1 FROM group_members gm
                    WHERE gm.group_id = m.group_id AND gm.user_id = r.user_id))
             OR (m.to_user_id IS NOT NULL AND r.user_id IN (m.sender_id, m.to_user_id))
           )
         ORDER BY r.created_at ASC",
        placeholders.join(", ")
    );

    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let kind: String = row.get(3)?;
            Ok(Reaction {
                id: uuid_at(row, 0)?,
                message_id: uuid_at(row, 1)?,
                user_id: uuid_at(row, 2)?,
                kind: kind
                    .parse()
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
                created_at: time_at(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
    for reaction in rows {
        by_message.entry(reaction.message_id).or_default().push(reaction);
    }
    for message in messages.iter_mut() {
        message.reactions = by_message.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}
