use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use cohort_shared::{GroupId, UserId};

use crate::codec::{epoch, parse_ts, ts};
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Move the user's read watermark for the group to `at`.
    pub fn mark_read(&self, group_id: GroupId, user: &UserId, at: &DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO group_reads (group_id, user_id, last_read) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, user_id) DO UPDATE SET last_read = excluded.last_read",
            params![group_id.to_string(), user.as_str(), ts(at)],
        )?;
        Ok(())
    }

    /// The user's read watermark, or the epoch if they never read the group.
    pub fn last_read(&self, group_id: GroupId, user: &UserId) -> Result<DateTime<Utc>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT last_read FROM group_reads WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(parse_ts(0, &raw)?),
            None => Ok(epoch()),
        }
    }
}
