//! Unread Tracker: per-user read watermarks and the group listing that
//! carries unread counts.

use chrono::Utc;
use serde::Serialize;

use cohort_shared::{ChatError, ChatResult, GroupId, UserId};
use cohort_store::{Database, Group};

use crate::membership::{capabilities_in, resolve_capabilities, Capabilities};

/// A group as listed for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    #[serde(flatten)]
    pub group: Group,
    pub unread_count: u32,
    pub capabilities: Capabilities,
}

pub fn mark_read(db: &Database, user: &UserId, group_id: GroupId) -> ChatResult<()> {
    let group = db.get_group(group_id)?;
    if !capabilities_in(db, user, &group)?.can_read {
        return Err(ChatError::forbidden("cannot access this group"));
    }
    db.mark_read(group_id, user, &Utc::now())?;
    Ok(())
}

/// Messages (replies included) newer than the user's watermark that the
/// user did not send.
pub fn compute_unread(db: &Database, user: &UserId, group_id: GroupId) -> ChatResult<u32> {
    let since = db.last_read(group_id, user)?;
    Ok(db.count_unread(group_id, user, &since)?)
}

/// Every group in the community, with unread counts for the ones the user
/// can read.
pub fn list_groups(db: &Database, user: &UserId) -> ChatResult<Vec<GroupView>> {
    let community = db.get_community()?.ok_or(ChatError::NotFound("Community"))?;
    if !community.is_member(user) {
        return Err(ChatError::forbidden("not a member of this community"));
    }
    let is_community_admin = community.is_admin(user);

    let mut views = Vec::new();
    for group in db.list_groups()? {
        let capabilities = resolve_capabilities(user, &group, is_community_admin);
        let unread_count = if capabilities.can_read {
            compute_unread(db, user, group.id)?
        } else {
            0
        };
        views.push(GroupView {
            group,
            unread_count,
            capabilities,
        });
    }
    Ok(views)
}
