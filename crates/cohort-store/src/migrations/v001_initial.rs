//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `community`, `community_members`,
//! `chat_groups`, `group_memberships` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identities seen from the identity provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- opaque provider id
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL                -- RFC-3339, microsecond precision
);

-- ----------------------------------------------------------------
-- Community (singleton row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS community (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS community_members (
    user_id   TEXT PRIMARY KEY NOT NULL,
    is_admin  INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    joined_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_groups (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    is_announcement INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at      TEXT NOT NULL
);

-- Exactly one announcement group per deployment.
CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_single_announcement
    ON chat_groups(is_announcement) WHERE is_announcement = 1;

-- One row per (group, user): admin implies member, pending and member are
-- disjoint by construction.
CREATE TABLE IF NOT EXISTS group_memberships (
    group_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    role       TEXT NOT NULL CHECK (role IN ('admin', 'member', 'pending')),
    updated_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_memberships_user ON group_memberships(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v7 (time ordered)
    group_id      TEXT NOT NULL,              -- FK -> chat_groups(id)
    sender_id     TEXT NOT NULL,              -- weak ref -> users(id)
    kind          TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file', 'poll', 'event')),
    content       TEXT NOT NULL DEFAULT '',   -- text, or opaque attachment path
    poll_json     TEXT,
    event_json    TEXT,
    mentions_json TEXT NOT NULL DEFAULT '[]',
    is_pinned     INTEGER NOT NULL DEFAULT 0,
    parent_id     TEXT,                       -- FK -> messages(id), top-level only
    reply_count   INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0),
    created_at    TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_group_page
    ON messages(group_id, parent_id, id);

CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);

-- At most one pinned message per group.
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_single_pin
    ON messages(group_id) WHERE is_pinned = 1;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
