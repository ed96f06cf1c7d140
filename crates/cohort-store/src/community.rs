use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use cohort_shared::constants::{ANNOUNCEMENT_GROUP_DESCRIPTION, ANNOUNCEMENT_GROUP_NAME};
use cohort_shared::{GroupId, UserId};

use crate::codec::{parse_id, parse_ts, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::groups::{set_membership_on, write_group};
use crate::models::{Community, Group, MemberRole};

impl Database {
    /// Create the community and its announcement group in one transaction.
    ///
    /// The creator becomes community admin and announcement admin. Fails
    /// with `AlreadyExists` if a community is already configured.
    pub fn create_community(
        &mut self,
        creator: &UserId,
        name: &str,
        description: &str,
    ) -> Result<(Community, Group)> {
        let now = Utc::now();
        let tx = self.conn_mut().transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM community WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists("Community"));
        }

        tx.execute(
            "INSERT INTO community (id, name, description, created_at) VALUES (1, ?1, ?2, ?3)",
            params![name, description, ts(&now)],
        )?;
        tx.execute(
            "INSERT INTO community_members (user_id, is_admin, joined_at) VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET is_admin = 1",
            params![creator.as_str(), ts(&now)],
        )?;

        let mut announcement = Group::new(ANNOUNCEMENT_GROUP_NAME, ANNOUNCEMENT_GROUP_DESCRIPTION, creator);
        announcement.is_announcement = true;
        announcement.created_at = now;
        write_group(&tx, &announcement)?;

        tx.commit()?;

        tracing::info!(name, creator = %creator, "community created");

        let community = Community {
            name: name.to_string(),
            description: description.to_string(),
            admins: BTreeSet::from([creator.clone()]),
            members: BTreeSet::from([creator.clone()]),
            created_at: now,
        };
        Ok((community, announcement))
    }

    pub fn get_community(&self) -> Result<Option<Community>> {
        let row = self
            .conn()
            .query_row(
                "SELECT name, description, created_at FROM community WHERE id = 1",
                [],
                |row| {
                    let created_at: String = row.get(2)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, parse_ts(2, &created_at)?))
                },
            )
            .optional()?;

        let Some((name, description, created_at)) = row else {
            return Ok(None);
        };

        let mut community = Community {
            name,
            description,
            admins: BTreeSet::new(),
            members: BTreeSet::new(),
            created_at,
        };

        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, is_admin FROM community_members")?;
        let rows = stmt.query_map([], |row| {
            Ok((UserId(row.get(0)?), row.get::<_, bool>(1)?))
        })?;
        for row in rows {
            let (user, is_admin) = row?;
            if is_admin {
                community.admins.insert(user.clone());
            }
            community.members.insert(user);
        }

        Ok(Some(community))
    }

    /// `None` if the user is not in the community, otherwise whether they
    /// are an admin.
    pub fn community_role(&self, user: &UserId) -> Result<Option<bool>> {
        let role = self
            .conn()
            .query_row(
                "SELECT is_admin FROM community_members WHERE user_id = ?1",
                params![user.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role)
    }

    /// Enroll a user as a plain member. Returns `false` if already enrolled.
    pub fn add_community_member(&self, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO community_members (user_id, is_admin, joined_at) VALUES (?1, 0, ?2)
             ON CONFLICT(user_id) DO NOTHING",
            params![user.as_str(), ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    /// Promote a user to community admin and mirror the promotion into the
    /// announcement group's admins.
    pub fn set_community_admin(&mut self, user: &UserId) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO community_members (user_id, is_admin, joined_at) VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET is_admin = 1",
            params![user.as_str(), ts(&Utc::now())],
        )?;

        let announcement: Option<GroupId> = tx
            .query_row(
                "SELECT id FROM chat_groups WHERE is_announcement = 1",
                [],
                |row| {
                    let raw: String = row.get(0)?;
                    parse_id(0, &raw)
                },
            )
            .optional()?;
        if let Some(group_id) = announcement {
            set_membership_on(&tx, group_id, user, MemberRole::Admin)?;
        }

        tx.commit()?;
        Ok(())
    }
}
