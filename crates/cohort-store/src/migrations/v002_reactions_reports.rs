use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Reactions: one per (message, user)
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,              -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,              -- emoji character(s)
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- Read watermarks for unread counts
CREATE TABLE IF NOT EXISTS group_reads (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    last_read TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
);

-- Moderation reports. message_id is a weak reference: a report can outlive
-- the message it points at, but not the group.
CREATE TABLE IF NOT EXISTS reports (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    message_id       TEXT NOT NULL,
    reported_user_id TEXT NOT NULL,
    reported_by_id   TEXT NOT NULL,
    group_id         TEXT NOT NULL,
    reason           TEXT NOT NULL CHECK (reason IN ('abuse', 'spam', 'inappropriate', 'harassment', 'other')),
    status           TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'reviewed', 'action_taken')),
    created_at       TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(created_at DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
