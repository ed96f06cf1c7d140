use tracing::info;

use cohort_shared::{ChatError, ChatResult, UserId};
use cohort_store::{Community, Database, GroupSummary};

use crate::events::{Outcome, ServerEvent, Targets};
use crate::membership::require_community_admin;

/// Create the deployment's community and its announcement group.
pub fn create_community(
    db: &mut Database,
    user: &UserId,
    name: &str,
    description: &str,
) -> ChatResult<Outcome<Community>> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::invalid("community name must not be empty"));
    }

    let (community, announcement) = db.create_community(user, name, description.trim())?;
    let summary = GroupSummary::from(&announcement);
    Ok(Outcome::quiet(community).notify(Targets::Everyone, ServerEvent::GroupCreated(summary)))
}

pub fn get_community(db: &Database, user: &UserId) -> ChatResult<Community> {
    let community = db.get_community()?.ok_or(ChatError::NotFound("Community"))?;
    if !community.is_member(user) {
        return Err(ChatError::forbidden("not a member of this community"));
    }
    Ok(community)
}

/// Enroll the user. Returns whether they were newly added.
pub fn join_community(db: &mut Database, user: &UserId) -> ChatResult<Outcome<bool>> {
    if db.get_community()?.is_none() {
        return Err(ChatError::NotFound("Community"));
    }
    let joined = db.add_community_member(user)?;
    if joined {
        info!(user = %user, "joined community");
    }
    Ok(Outcome::quiet(joined))
}

/// Promote a user to community admin, which also makes them an admin of
/// the announcement group.
pub fn add_community_admin(db: &mut Database, admin: &UserId, target: &UserId) -> ChatResult<Outcome<()>> {
    require_community_admin(db, admin)?;
    if !db.user_exists(target)? {
        return Err(ChatError::NotFound("User"));
    }

    db.set_community_admin(target)?;
    info!(user = %target, by = %admin, "community admin added");
    Ok(Outcome::quiet(()))
}
