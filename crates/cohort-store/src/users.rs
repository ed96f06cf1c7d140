use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use cohort_shared::{UserId, UserSummary};

use crate::codec::{parse_ts, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert the user, or refresh the display name if already known.
    pub fn upsert_user(&self, id: &UserId, name: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id.as_str(), name, ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(|e| StoreError::or_not_found(e, "User"))
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// `{id, name}` for a user; unknown ids fall back to the id as name.
    pub fn user_summary(&self, id: &UserId) -> Result<UserSummary> {
        match self.get_user(id) {
            Ok(user) => Ok(user.summary()),
            Err(StoreError::NotFound(_)) => Ok(UserSummary {
                id: id.clone(),
                name: id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    Ok(User {
        id: UserId(id),
        name: row.get(1)?,
        created_at: parse_ts(2, &created_at)?,
    })
}
