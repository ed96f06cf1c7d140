//! Membership Authority: who may read, post and administer a group, and the
//! join / approve / reject / add / remove / leave state machine.

use serde::Serialize;
use tracing::info;

use cohort_shared::{ChatError, ChatResult, GroupId, UserId};
use cohort_store::{Database, Group, GroupSummary, MemberRole};

use crate::events::{ChannelKey, Outcome, ServerEvent, Targets};

/// What a user may do in one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub is_admin: bool,
    pub is_member: bool,
    pub is_pending: bool,
    pub is_community_admin: bool,
    pub can_read: bool,
    pub can_post: bool,
}

/// Resolve a user's capabilities in a loaded group.
///
/// Admins are always members. The announcement group is readable by
/// everyone but only its admins may post there.
pub fn resolve_capabilities(user: &UserId, group: &Group, is_community_admin: bool) -> Capabilities {
    let is_admin = group.is_admin(user);
    let is_member = is_admin || group.is_member(user);
    let is_pending = !is_member && group.is_pending(user);

    let (can_read, can_post) = if group.is_announcement {
        (true, is_admin)
    } else {
        (is_member, is_member)
    };

    Capabilities {
        is_admin,
        is_member,
        is_pending,
        is_community_admin,
        can_read,
        can_post,
    }
}

/// Load the community role and resolve capabilities in one call.
pub fn capabilities_in(db: &Database, user: &UserId, group: &Group) -> ChatResult<Capabilities> {
    let is_community_admin = db.community_role(user)? == Some(true);
    Ok(resolve_capabilities(user, group, is_community_admin))
}

pub(crate) fn require_group_admin(group: &Group, user: &UserId) -> ChatResult<()> {
    if group.is_admin(user) {
        Ok(())
    } else {
        Err(ChatError::forbidden("only group admins can do that"))
    }
}

pub(crate) fn require_community_admin(db: &Database, user: &UserId) -> ChatResult<()> {
    match db.community_role(user)? {
        Some(true) => Ok(()),
        _ => Err(ChatError::forbidden("only community admins can do that")),
    }
}

fn require_known_user(db: &Database, user: &UserId) -> ChatResult<()> {
    if db.user_exists(user)? {
        Ok(())
    } else {
        Err(ChatError::NotFound("User"))
    }
}

/// Ask to join a group. Repeating the request is harmless.
pub fn request_join(db: &mut Database, user: &UserId, group_id: GroupId) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    if group.is_member(user) {
        return Err(ChatError::AlreadyMember);
    }
    if group.is_announcement {
        return Err(ChatError::AnnouncementNotJoinable);
    }

    if !group.is_pending(user) {
        db.set_membership(group_id, user, MemberRole::Pending)?;
        info!(group = %group_id, user = %user, "join requested");
    }

    let event = ServerEvent::JoinRequested {
        group_id,
        user: db.user_summary(user)?,
    };
    let targets = Targets::users(&group.admins).and(ChannelKey::User(user.clone()));
    Ok(Outcome::quiet(()).notify(targets, event))
}

pub fn approve(
    db: &mut Database,
    admin: &UserId,
    group_id: GroupId,
    target: &UserId,
) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    require_group_admin(&group, admin)?;
    require_known_user(db, target)?;

    if !group.is_member(target) {
        db.set_membership(group_id, target, MemberRole::Member)?;
        info!(group = %group_id, user = %target, by = %admin, "join request approved");
    }

    let event = ServerEvent::RequestApproved {
        group_id,
        user: db.user_summary(target)?,
        group_name: group.name.clone(),
    };
    let targets = Targets::users(&group.admins).and(ChannelKey::User(target.clone()));
    Ok(Outcome::quiet(()).notify(targets, event))
}

pub fn reject(
    db: &mut Database,
    admin: &UserId,
    group_id: GroupId,
    target: &UserId,
) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    require_group_admin(&group, admin)?;

    if db.membership_role(group_id, target)? == Some(MemberRole::Pending) {
        db.remove_membership(group_id, target)?;
        info!(group = %group_id, user = %target, by = %admin, "join request rejected");
    }

    let event = ServerEvent::RequestRejected {
        group_id,
        user_id: target.clone(),
        group_name: group.name,
    };
    Ok(Outcome::quiet(()).notify(Targets::Everyone, event))
}

/// Add a user directly. A pending request from them is converted into
/// membership.
pub fn add_member(
    db: &mut Database,
    admin: &UserId,
    group_id: GroupId,
    target: &UserId,
) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    require_group_admin(&group, admin)?;
    if group.is_announcement {
        return Err(ChatError::AnnouncementNotJoinable);
    }
    require_known_user(db, target)?;
    if group.is_member(target) {
        return Err(ChatError::AlreadyMember);
    }

    db.set_membership(group_id, target, MemberRole::Member)?;
    info!(group = %group_id, user = %target, by = %admin, "member added");

    let event = ServerEvent::MemberAdded {
        group_id,
        user: db.user_summary(target)?,
    };
    let targets = Targets::group(group_id).and(ChannelKey::User(target.clone()));
    Ok(Outcome::quiet(()).notify(targets, event))
}

pub fn remove_member(
    db: &mut Database,
    admin: &UserId,
    group_id: GroupId,
    target: &UserId,
) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    require_group_admin(&group, admin)?;
    expel(db, &group, target)
}

/// Remove a non-admin from a group and tell them. Shared by admin removal
/// and report resolution, which skips the group-admin check.
pub(crate) fn expel(db: &mut Database, group: &Group, target: &UserId) -> ChatResult<Outcome<()>> {
    if group.is_admin(target) {
        return Err(ChatError::CannotRemoveAdmin);
    }

    if group.is_member(target) {
        db.remove_membership(group.id, target)?;
        info!(group = %group.id, user = %target, "member removed");
    }

    let targets = Targets::group(group.id).and(ChannelKey::User(target.clone()));
    Ok(Outcome::quiet(())
        .notify(
            targets,
            ServerEvent::MemberRemoved {
                group_id: group.id,
                user_id: target.clone(),
            },
        )
        .notify(
            Targets::user(target),
            ServerEvent::Kicked {
                group_id: group.id,
                group_name: group.name.clone(),
            },
        ))
}

/// A member walks out of a group. Admins must stay.
pub fn leave_group(db: &mut Database, user: &UserId, group_id: GroupId) -> ChatResult<Outcome<()>> {
    let group = db.get_group(group_id)?;
    if group.is_announcement {
        return Err(ChatError::AnnouncementNotJoinable);
    }
    if group.is_admin(user) {
        return Err(ChatError::forbidden("group admins cannot leave their group"));
    }
    if !group.is_member(user) {
        return Err(ChatError::forbidden("not a member of this group"));
    }

    db.remove_membership(group_id, user)?;
    info!(group = %group_id, user = %user, "member left");

    let targets = Targets::group(group_id).and(ChannelKey::User(user.clone()));
    Ok(Outcome::quiet(()).notify(
        targets,
        ServerEvent::MemberRemoved {
            group_id,
            user_id: user.clone(),
        },
    ))
}

pub fn create_group(
    db: &mut Database,
    admin: &UserId,
    name: &str,
    description: &str,
) -> ChatResult<Outcome<Group>> {
    require_community_admin(db, admin)?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::invalid("group name must not be empty"));
    }
    if name.chars().count() > cohort_shared::constants::MAX_GROUP_NAME_LEN {
        return Err(ChatError::invalid("group name is too long"));
    }

    let group = Group::new(name, description.trim(), admin);
    db.insert_group(&group)?;
    info!(group = %group.id, name = %group.name, by = %admin, "group created");

    let summary = GroupSummary::from(&group);
    Ok(Outcome::quiet(group).notify(Targets::Everyone, ServerEvent::GroupCreated(summary)))
}

pub fn delete_group(db: &mut Database, admin: &UserId, group_id: GroupId) -> ChatResult<Outcome<()>> {
    require_community_admin(db, admin)?;
    let group = db.get_group(group_id)?;
    if group.is_announcement {
        return Err(ChatError::forbidden("the announcement group cannot be deleted"));
    }

    db.delete_group(group_id)?;
    info!(group = %group_id, by = %admin, "group deleted");

    Ok(Outcome::quiet(()).notify(Targets::Everyone, ServerEvent::GroupDeleted { group_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture, Fixture};

    #[test]
    fn capabilities_for_plain_group() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut group = Group::new("g", "", &alice);
        group.pending_requests.insert(bob.clone());

        let admin = resolve_capabilities(&alice, &group, false);
        assert!(admin.is_admin && admin.is_member && admin.can_read && admin.can_post);

        let pending = resolve_capabilities(&bob, &group, false);
        assert!(pending.is_pending);
        assert!(!pending.is_member && !pending.can_read && !pending.can_post);
    }

    #[test]
    fn capabilities_for_announcement_group() {
        let alice = UserId::new("alice");
        let mut group = Group::new("news", "", &alice);
        group.is_announcement = true;

        let reader = resolve_capabilities(&UserId::new("bob"), &group, false);
        assert!(reader.can_read);
        assert!(!reader.can_post);

        let admin = resolve_capabilities(&alice, &group, true);
        assert!(admin.can_post && admin.is_community_admin);
    }

    #[test]
    fn request_then_approve() {
        let Fixture { mut db, admin, group, .. } = fixture();
        let bob = UserId::new("bob");

        let outcome = request_join(&mut db, &bob, group).unwrap();
        assert!(outcome.dispatches[0].targets.includes(&ChannelKey::User(admin.clone())));
        assert!(outcome.dispatches[0].targets.includes(&ChannelKey::User(bob.clone())));
        request_join(&mut db, &bob, group).unwrap();
        assert_eq!(db.get_group(group).unwrap().pending_requests.len(), 1);

        let outcome = approve(&mut db, &admin, group, &bob).unwrap();
        let loaded = db.get_group(group).unwrap();
        assert!(loaded.is_member(&bob));
        assert!(!loaded.is_pending(&bob));
        assert!(matches!(
            &outcome.dispatches[0].event,
            ServerEvent::RequestApproved { user, .. } if user.id == bob
        ));
        assert!(outcome.dispatches[0].targets.includes(&ChannelKey::User(bob.clone())));

        assert_eq!(request_join(&mut db, &bob, group).unwrap_err(), ChatError::AlreadyMember);
    }

    #[test]
    fn approve_requires_admin_and_known_user() {
        let Fixture { mut db, admin, group, .. } = fixture();
        let bob = UserId::new("bob");
        request_join(&mut db, &bob, group).unwrap();

        assert!(matches!(
            approve(&mut db, &bob, group, &bob),
            Err(ChatError::Forbidden(_))
        ));
        assert_eq!(
            approve(&mut db, &admin, group, &UserId::new("ghost")).unwrap_err(),
            ChatError::NotFound("User")
        );
    }

    #[test]
    fn reject_only_clears_pending() {
        let Fixture { mut db, admin, group, .. } = fixture();
        let bob = UserId::new("bob");
        let carol = UserId::new("carol");
        request_join(&mut db, &bob, group).unwrap();
        add_member(&mut db, &admin, group, &carol).unwrap();

        let outcome = reject(&mut db, &admin, group, &bob).unwrap();
        assert_eq!(outcome.dispatches[0].targets, Targets::Everyone);
        let broadcast = serde_json::to_value(&outcome.dispatches[0].event).unwrap();
        assert_eq!(broadcast["event"], "groupCreated");
        assert_eq!(broadcast["data"]["name"], "Study");
        assert!(broadcast["data"].get("members").is_none());
        assert!(broadcast["data"].get("pendingRequests").is_none());
        reject(&mut db, &admin, group, &carol).unwrap();

        let loaded = db.get_group(group).unwrap();
        assert!(!loaded.is_pending(&bob));
        assert!(!loaded.is_member(&bob));
        assert!(loaded.is_member(&carol));
    }

    #[test]
    fn add_converts_pending_and_rejects_duplicates() {
        let Fixture { mut db, admin, group, .. } = fixture();
        let bob = UserId::new("bob");
        request_join(&mut db, &bob, group).unwrap();

        add_member(&mut db, &admin, group, &bob).unwrap();
        let loaded = db.get_group(group).unwrap();
        assert!(loaded.is_member(&bob) && !loaded.is_pending(&bob));

        assert_eq!(add_member(&mut db, &admin, group, &bob).unwrap_err(), ChatError::AlreadyMember);
    }

    #[test]
    fn remove_member_kicks_but_never_admins() {
        let Fixture { mut db, admin, group, .. } = fixture();
        let bob = UserId::new("bob");
        add_member(&mut db, &admin, group, &bob).unwrap();

        let outcome = remove_member(&mut db, &admin, group, &bob).unwrap();
        assert!(!db.get_group(group).unwrap().is_member(&bob));
        assert_eq!(outcome.dispatches.len(), 2);
        assert!(matches!(outcome.dispatches[1].event, ServerEvent::Kicked { .. }));

        assert_eq!(
            remove_member(&mut db, &admin, group, &admin).unwrap_err(),
            ChatError::CannotRemoveAdmin
        );
    }

    #[test]
    fn leave_rules() {
        let Fixture { mut db, admin, group, announcement } = fixture();
        let bob = UserId::new("bob");
        add_member(&mut db, &admin, group, &bob).unwrap();

        leave_group(&mut db, &bob, group).unwrap();
        assert!(!db.get_group(group).unwrap().is_member(&bob));

        assert!(matches!(leave_group(&mut db, &admin, group), Err(ChatError::Forbidden(_))));
        assert_eq!(
            leave_group(&mut db, &bob, announcement).unwrap_err(),
            ChatError::AnnouncementNotJoinable
        );
        assert_eq!(
            request_join(&mut db, &bob, announcement).unwrap_err(),
            ChatError::AnnouncementNotJoinable
        );
    }

    #[test]
    fn group_lifecycle_needs_community_admin() {
        let Fixture { mut db, admin, announcement, .. } = fixture();
        let bob = UserId::new("bob");

        assert!(matches!(
            create_group(&mut db, &bob, "Nope", ""),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            create_group(&mut db, &admin, "   ", ""),
            Err(ChatError::InvalidPayload(_))
        ));

        let outcome = create_group(&mut db, &admin, " Study ", "").unwrap();
        assert_eq!(outcome.value.name, "Study");
        assert!(outcome.value.is_admin(&admin));
        assert_eq!(outcome.dispatches[0].targets, Targets::Everyone);
        let broadcast = serde_json::to_value(&outcome.dispatches[0].event).unwrap();
        assert_eq!(broadcast["event"], "groupCreated");
        assert_eq!(broadcast["data"]["name"], "Study");
        assert!(broadcast["data"].get("members").is_none());
        assert!(broadcast["data"].get("pendingRequests").is_none());

        assert!(matches!(
            delete_group(&mut db, &admin, announcement),
            Err(ChatError::Forbidden(_))
        ));
        delete_group(&mut db, &admin, outcome.value.id).unwrap();
        assert_eq!(db.get_group(outcome.value.id).unwrap_err().to_string(), "Group not found");
    }
}
