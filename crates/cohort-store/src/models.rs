use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_shared::content::{EventData, MessageKind, PollData, Reaction};
use cohort_shared::report::{ReportReason, ReportStatus};
use cohort_shared::{GroupId, MessageId, ReportId, UserId, UserSummary};

/// An identity seen from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The deployment's single community. Admins are also listed in `members`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub name: String,
    pub description: String,
    pub admins: BTreeSet<UserId>,
    pub members: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user) || self.admins.contains(user)
    }
}

/// Role of a user inside a group. One row per (group, user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
    Pending,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Self::Admin | Self::Member)
    }
}

/// A discussion group (or the announcement group).
///
/// `members` always includes the admins; `pending_requests` is disjoint from
/// both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub is_announcement: bool,
    pub admins: BTreeSet<UserId>,
    pub members: BTreeSet<UserId>,
    pub pending_requests: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// A fresh group whose only member is its creating admin.
    pub fn new(name: impl Into<String>, description: impl Into<String>, creator: &UserId) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            description: description.into(),
            is_announcement: false,
            admins: BTreeSet::from([creator.clone()]),
            members: BTreeSet::from([creator.clone()]),
            pending_requests: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user) || self.admins.contains(user)
    }

    pub fn is_pending(&self, user: &UserId) -> bool {
        self.pending_requests.contains(user)
    }

    pub fn role_of(&self, user: &UserId) -> Option<MemberRole> {
        if self.is_admin(user) {
            Some(MemberRole::Admin)
        } else if self.is_member(user) {
            Some(MemberRole::Member)
        } else if self.is_pending(user) {
            Some(MemberRole::Pending)
        } else {
            None
        }
    }
}

/// The public face of a group, broadcast to the whole community when it is
/// created. Membership sets stay on the group channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub is_announcement: bool,
    pub admins: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<&Group> for GroupSummary {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            description: group.description.clone(),
            is_announcement: group.is_announcement,
            admins: group.admins.clone(),
            created_at: group.created_at,
        }
    }
}

/// A chat message as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender: UserSummary,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(rename = "pollData", skip_serializing_if = "Option::is_none", default)]
    pub poll: Option<PollData>,
    #[serde(rename = "eventData", skip_serializing_if = "Option::is_none", default)]
    pub event: Option<EventData>,
    pub reactions: Vec<Reaction>,
    pub mentions: Vec<UserId>,
    pub is_pinned: bool,
    pub parent_id: Option<MessageId>,
    pub reply_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// What [`Database::delete_message`](crate::Database::delete_message)
/// removed besides the message itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deletion {
    /// Replies removed by the cascade, oldest first.
    pub replies: Vec<MessageId>,
    /// Whether the group's pinned message was among the removed rows.
    pub unpinned: bool,
}

/// Insert payload for [`Database::insert_message`](crate::Database::insert_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub poll: Option<PollData>,
    pub event: Option<EventData>,
    pub mentions: Vec<UserId>,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    pub message_id: MessageId,
    pub reported_user_id: UserId,
    pub reported_by_id: UserId,
    pub group_id: GroupId,
    pub reason: ReportReason,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

/// A report with the names and message text an admin needs to decide on it.
/// `message_content` is `None` once the message has been deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetails {
    #[serde(flatten)]
    pub report: Report,
    pub message_content: Option<String>,
    pub reported_user: UserSummary,
    pub reported_by: UserSummary,
    pub group_name: String,
}
