use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use cohort_shared::{GroupId, UserId};

use crate::codec::{parse_enum, parse_id, parse_ts, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Group, MemberRole};

const GROUP_COLUMNS: &str = "id, name, description, is_announcement, created_at";

impl Database {
    /// Insert a group together with its initial membership rows.
    pub fn insert_group(&mut self, group: &Group) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        write_group(&tx, group)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        load_group(self.conn(), id)
    }

    /// All groups, announcement group first, then by creation time.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM chat_groups
             ORDER BY is_announcement DESC, created_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            fill_memberships(self.conn(), &mut group)?;
            groups.push(group);
        }
        Ok(groups)
    }

    pub fn announcement_group(&self) -> Result<Option<Group>> {
        let group = self
            .conn()
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE is_announcement = 1"),
                [],
                row_to_group,
            )
            .optional()?;

        match group {
            Some(mut group) => {
                fill_memberships(self.conn(), &mut group)?;
                Ok(Some(group))
            }
            None => Ok(None),
        }
    }

    pub fn membership_role(&self, group_id: GroupId, user: &UserId) -> Result<Option<MemberRole>> {
        let role: Option<String> = self
            .conn()
            .query_row(
                "SELECT role FROM group_memberships WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), user.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.and_then(|r| MemberRole::parse(&r)))
    }

    /// Set the user's role in the group, replacing any previous role.
    pub fn set_membership(&self, group_id: GroupId, user: &UserId, role: MemberRole) -> Result<()> {
        set_membership_on(self.conn(), group_id, user, role)
    }

    /// Remove the user's membership row of any role. Returns whether a row
    /// was removed.
    pub fn remove_membership(&self, group_id: GroupId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_memberships WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a group. Messages, reactions, reports, memberships and read
    /// watermarks go with it through the foreign-key cascades.
    pub fn delete_group(&mut self, id: GroupId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        let affected = tx.execute(
            "DELETE FROM chat_groups WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;

        if affected > 0 {
            tracing::debug!(group_id = %id, "group deleted from store");
        }
        Ok(affected > 0)
    }
}

pub(crate) fn write_group(conn: &Connection, group: &Group) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_groups (id, name, description, is_announcement, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            group.id.to_string(),
            group.name,
            group.description,
            group.is_announcement,
            ts(&group.created_at),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::AlreadyExists("Group")
        }
        other => StoreError::Sqlite(other),
    })?;

    let users: BTreeSet<&UserId> = group
        .admins
        .iter()
        .chain(group.members.iter())
        .chain(group.pending_requests.iter())
        .collect();
    for user in users {
        if let Some(role) = group.role_of(user) {
            set_membership_on(conn, group.id, user, role)?;
        }
    }
    Ok(())
}

pub(crate) fn set_membership_on(
    conn: &Connection,
    group_id: GroupId,
    user: &UserId,
    role: MemberRole,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_memberships (group_id, user_id, role, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(group_id, user_id) DO UPDATE SET
             role = excluded.role,
             updated_at = excluded.updated_at",
        params![group_id.to_string(), user.as_str(), role.as_str(), ts(&Utc::now())],
    )?;
    Ok(())
}

fn load_group(conn: &Connection, id: GroupId) -> Result<Group> {
    let mut group = conn
        .query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE id = ?1"),
            params![id.to_string()],
            row_to_group,
        )
        .map_err(|e| StoreError::or_not_found(e, "Group"))?;
    fill_memberships(conn, &mut group)?;
    Ok(group)
}

fn fill_memberships(conn: &Connection, group: &mut Group) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT user_id, role FROM group_memberships WHERE group_id = ?1",
    )?;
    let rows = stmt.query_map(params![group.id.to_string()], |row| {
        let user: String = row.get(0)?;
        let role: String = row.get(1)?;
        Ok((UserId(user), parse_enum(1, &role, MemberRole::parse)?))
    })?;

    for row in rows {
        let (user, role) = row?;
        match role {
            MemberRole::Admin => {
                group.admins.insert(user.clone());
                group.members.insert(user);
            }
            MemberRole::Member => {
                group.members.insert(user);
            }
            MemberRole::Pending => {
                group.pending_requests.insert(user);
            }
        }
    }
    Ok(())
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;

    Ok(Group {
        id: parse_id(0, &id)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_announcement: row.get(3)?,
        admins: BTreeSet::new(),
        members: BTreeSet::new(),
        pending_requests: BTreeSet::new(),
        created_at: parse_ts(4, &created_at)?,
    })
}
