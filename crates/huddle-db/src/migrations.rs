use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            avatar      TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS friendships (
            user_id     TEXT NOT NULL REFERENCES users(id),
            friend_id   TEXT NOT NULL REFERENCES users(id),
            chat_theme  TEXT NOT NULL DEFAULT 'default',
            created_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, friend_id)
        );

        CREATE TABLE IF NOT EXISTS blocks (
            blocker_id  TEXT NOT NULL REFERENCES users(id),
            blocked_id  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            PRIMARY KEY (blocker_id, blocked_id)
        );

        CREATE TABLE IF NOT EXISTS chat_groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            avatar      TEXT,
            chat_theme  TEXT NOT NULL DEFAULT 'default',
            created_at  TEXT NOT NULL
        );

        -- seq is the stable tie-break for successor promotion
        CREATE TABLE IF NOT EXISTS group_members (
            seq                  INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id             TEXT NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
            user_id              TEXT NOT NULL REFERENCES users(id),
            is_admin             INTEGER NOT NULL DEFAULT 0,
            notifications_muted  INTEGER NOT NULL DEFAULT 0,
            UNIQUE(group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            to_user_id  TEXT REFERENCES users(id),
            group_id    TEXT REFERENCES chat_groups(id) ON DELETE CASCADE,
            body        TEXT NOT NULL,
            attachment  TEXT,
            created_at  TEXT NOT NULL,
            is_read     INTEGER NOT NULL DEFAULT 0,
            CHECK ((to_user_id IS NULL) <> (group_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, created_at, seq);

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender_id, to_user_id, created_at, seq);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
