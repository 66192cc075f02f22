//! Database row types and column helpers.
//! Rows that leave the crate are converted to huddle-types models; `MemberRow`
//! stays internal because it carries the ordering sequence.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use huddle_types::models::{Group, User};

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub seq: i64,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub notifications_muted: bool,
}

impl MemberRow {
    pub(crate) const COLUMNS: &'static str = "seq, group_id, user_id, is_admin, notifications_muted";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            group_id: uuid_at(row, 1)?,
            user_id: uuid_at(row, 2)?,
            is_admin: row.get(3)?,
            notifications_muted: row.get(4)?,
        })
    }
}

pub(crate) const USER_COLUMNS: &str = "u.id, u.username, u.avatar";

/// Reads `id, username, avatar` starting at column `offset`.
pub(crate) fn user_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, offset)?,
        username: row.get(offset + 1)?,
        avatar: row.get(offset + 2)?,
    })
}

pub(crate) const GROUP_COLUMNS: &str = "g.id, g.name, g.avatar, g.chat_theme, g.created_at";

pub(crate) fn group_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Group> {
    Ok(Group {
        id: uuid_at(row, offset)?,
        name: row.get(offset + 1)?,
        avatar: row.get(offset + 2)?,
        chat_theme: row.get(offset + 3)?,
        created_at: time_at(row, offset + 4)?,
    })
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width RFC 3339 so that lexical order in SQLite equals time order.
pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
