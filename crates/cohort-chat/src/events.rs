//! Realtime wire protocol and notification plans.
//!
//! Every frame on the socket is a JSON object `{"event": name, "data": payload}`.
//! Operations never push to sockets themselves: they return an [`Outcome`]
//! listing which channels receive which event, and the facade hands those
//! [`Dispatch`]es to the hub once the store transaction has committed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cohort_shared::content::{EventData, PollData, Reaction};
use cohort_shared::report::ReportReason;
use cohort_shared::{GroupId, MessageId, ReportId, UserId, UserSummary};
use cohort_store::{GroupSummary, Message};

/// A broadcast channel: a group room or a user's personal channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    Group(GroupId),
    User(UserId),
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage(Message),
    MessageDeleted {
        message_id: MessageId,
        group_id: GroupId,
        parent_id: Option<MessageId>,
    },
    ChatCleared {
        group_id: GroupId,
    },
    PinUpdated {
        group_id: GroupId,
        pinned_message: Option<Message>,
    },
    ReactionUpdated {
        message_id: MessageId,
        group_id: GroupId,
        reactions: Vec<Reaction>,
    },
    PollUpdated {
        message_id: MessageId,
        group_id: GroupId,
        poll_data: PollData,
    },
    EventUpdated {
        message_id: MessageId,
        group_id: GroupId,
        event_data: EventData,
    },
    GroupCreated(GroupSummary),
    GroupDeleted {
        group_id: GroupId,
    },
    JoinRequested {
        group_id: GroupId,
        user: UserSummary,
    },
    RequestApproved {
        group_id: GroupId,
        user: UserSummary,
        group_name: String,
    },
    RequestRejected {
        group_id: GroupId,
        user_id: UserId,
        group_name: String,
    },
    MemberAdded {
        group_id: GroupId,
        user: UserSummary,
    },
    MemberRemoved {
        group_id: GroupId,
        user_id: UserId,
    },
    Kicked {
        group_id: GroupId,
        group_name: String,
    },
    Mentioned {
        group_id: GroupId,
        message_id: MessageId,
        by: UserSummary,
    },
    Warned {
        group_id: GroupId,
        group_name: String,
        reason: ReportReason,
    },
    NewReport {
        report_id: ReportId,
        group_id: GroupId,
    },
    Typing {
        group_id: GroupId,
        user: UserSummary,
    },
    StopTyping {
        group_id: GroupId,
        user_id: UserId,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::ChatCleared { .. } => "chatCleared",
            Self::PinUpdated { .. } => "pinUpdated",
            Self::ReactionUpdated { .. } => "reactionUpdated",
            Self::PollUpdated { .. } => "pollUpdated",
            Self::EventUpdated { .. } => "eventUpdated",
            Self::GroupCreated(_) => "groupCreated",
            Self::GroupDeleted { .. } => "groupDeleted",
            Self::JoinRequested { .. } => "joinRequested",
            Self::RequestApproved { .. } => "requestApproved",
            Self::RequestRejected { .. } => "requestRejected",
            Self::MemberAdded { .. } => "memberAdded",
            Self::MemberRemoved { .. } => "memberRemoved",
            Self::Kicked { .. } => "kicked",
            Self::Mentioned { .. } => "mentioned",
            Self::Warned { .. } => "warned",
            Self::NewReport { .. } => "newReport",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stopTyping",
            Self::Error { .. } => "error",
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinGroup { group_id: GroupId },
    /// Leaving a room also marks it read.
    LeaveGroup { group_id: GroupId },
    /// The personal channel is joined on connect; kept for older clients.
    JoinUser,
    Typing { group_id: GroupId },
    StopTyping { group_id: GroupId },
}

/// Who receives a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every live connection.
    Everyone,
    /// Connections subscribed to any of these channels.
    Channels(BTreeSet<ChannelKey>),
}

impl Targets {
    pub fn group(id: GroupId) -> Self {
        Self::Channels(BTreeSet::from([ChannelKey::Group(id)]))
    }

    pub fn user(id: &UserId) -> Self {
        Self::Channels(BTreeSet::from([ChannelKey::User(id.clone())]))
    }

    pub fn users<'a>(ids: impl IntoIterator<Item = &'a UserId>) -> Self {
        Self::Channels(ids.into_iter().map(|u| ChannelKey::User(u.clone())).collect())
    }

    /// Add a channel. No-op for [`Targets::Everyone`].
    pub fn and(mut self, key: ChannelKey) -> Self {
        if let Self::Channels(keys) = &mut self {
            keys.insert(key);
        }
        self
    }

    pub fn includes(&self, key: &ChannelKey) -> bool {
        match self {
            Self::Everyone => true,
            Self::Channels(keys) => keys.contains(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub targets: Targets,
    pub event: ServerEvent,
}

/// The result of a core operation plus the notifications it owes.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub dispatches: Vec<Dispatch>,
}

impl<T> Outcome<T> {
    /// An outcome with nothing to broadcast.
    pub fn quiet(value: T) -> Self {
        Self {
            value,
            dispatches: Vec::new(),
        }
    }

    pub fn notify(mut self, targets: Targets, event: ServerEvent) -> Self {
        self.dispatches.push(Dispatch { targets, event });
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            dispatches: self.dispatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_wire_shape() {
        let group_id = GroupId::new();
        let event = ServerEvent::MemberRemoved {
            group_id,
            user_id: UserId::new("bob"),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "memberRemoved");
        assert_eq!(json["event"], event.name());
        assert_eq!(json["data"]["groupId"], group_id.to_string());
        assert_eq!(json["data"]["userId"], "bob");
    }

    #[test]
    fn client_event_parses() {
        let group_id = GroupId::new();
        let raw = format!(r#"{{"event":"joinGroup","data":{{"groupId":"{group_id}"}}}}"#);
        let parsed: ClientEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, ClientEvent::JoinGroup { group_id });

        let parsed: ClientEvent = serde_json::from_str(r#"{"event":"joinUser"}"#).unwrap();
        assert_eq!(parsed, ClientEvent::JoinUser);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"shout"}"#).is_err());
    }

    #[test]
    fn targets_merge_channels() {
        let group = GroupId::new();
        let alice = UserId::new("alice");
        let targets = Targets::group(group).and(ChannelKey::User(alice.clone()));

        assert!(targets.includes(&ChannelKey::Group(group)));
        assert!(targets.includes(&ChannelKey::User(alice)));
        assert!(!targets.includes(&ChannelKey::User(UserId::new("bob"))));
        assert!(Targets::Everyone.includes(&ChannelKey::Group(group)));
    }
}
