//! Message Engine: classification, threading, pinning and the reaction /
//! vote / RSVP toggles.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use cohort_shared::constants::{MAX_PAGE_SIZE, MAX_TEXT_LEN};
use cohort_shared::content::{
    strip_reaction, toggle_reaction, validate_emoji, EventData, MessageKind, PollData, Reaction,
};
use cohort_shared::{ChatError, ChatResult, GroupId, MessageId, UserId};
use cohort_store::{Database, Group, Message, NewMessage};

use crate::events::{Outcome, ServerEvent, Targets};
use crate::membership::{capabilities_in, require_group_admin};

/// A binary the server has already stored. `path` is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: String,
    pub content_type: String,
}

/// What a client submits to post a message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: Option<MessageKind>,
    #[serde(rename = "pollData", default)]
    pub poll: Option<PollData>,
    #[serde(rename = "eventData", default)]
    pub event: Option<EventData>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    #[serde(skip)]
    pub attachment: Option<Attachment>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, parent: MessageId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

struct Classified {
    kind: MessageKind,
    content: String,
    poll: Option<PollData>,
    event: Option<EventData>,
}

fn classify(draft: Draft) -> ChatResult<Classified> {
    if let Some(attachment) = draft.attachment {
        return Ok(Classified {
            kind: MessageKind::for_attachment(&attachment.content_type),
            content: attachment.path,
            poll: None,
            event: None,
        });
    }

    match draft.kind {
        Some(MessageKind::Poll) => {
            let poll = draft
                .poll
                .ok_or_else(|| ChatError::invalid("poll message without poll data"))?
                .sanitized()?;
            Ok(Classified {
                kind: MessageKind::Poll,
                content: poll.question.clone(),
                poll: Some(poll),
                event: None,
            })
        }
        Some(MessageKind::Event) => {
            let event = draft
                .event
                .ok_or_else(|| ChatError::invalid("event message without event data"))?
                .sanitized()?;
            Ok(Classified {
                kind: MessageKind::Event,
                content: event.title.clone(),
                poll: None,
                event: Some(event),
            })
        }
        Some(MessageKind::Image | MessageKind::File) => {
            Err(ChatError::invalid("image and file messages need an uploaded attachment"))
        }
        Some(MessageKind::Text) | None => {
            let content = draft.content.trim();
            if content.is_empty() {
                return Err(ChatError::invalid("message content must not be empty"));
            }
            if content.chars().count() > MAX_TEXT_LEN {
                return Err(ChatError::invalid(format!(
                    "message content exceeds {MAX_TEXT_LEN} characters"
                )));
            }
            Ok(Classified {
                kind: MessageKind::Text,
                content: content.to_string(),
                poll: None,
                event: None,
            })
        }
    }
}

/// Load a message and its group, failing unless `user` can read the group.
fn readable_message(db: &Database, user: &UserId, id: MessageId) -> ChatResult<(Message, Group)> {
    let message = db.get_message(id)?;
    let group = db.get_group(message.group_id)?;
    if !capabilities_in(db, user, &group)?.can_read {
        return Err(ChatError::forbidden("cannot access this group"));
    }
    Ok((message, group))
}

fn readable_group(db: &Database, user: &UserId, group_id: GroupId) -> ChatResult<Group> {
    let group = db.get_group(group_id)?;
    if !capabilities_in(db, user, &group)?.can_read {
        return Err(ChatError::forbidden("cannot access this group"));
    }
    Ok(group)
}

/// Check that `user` may post in `group_id`, as a reply to `parent_id` when
/// given. The server runs this before storing an attachment.
pub fn authorize_post(
    db: &Database,
    user: &UserId,
    group_id: GroupId,
    parent_id: Option<MessageId>,
) -> ChatResult<Group> {
    let group = db.get_group(group_id)?;
    let caps = capabilities_in(db, user, &group)?;
    if !caps.can_post {
        return Err(if group.is_announcement {
            ChatError::forbidden("only admins can post announcements")
        } else {
            ChatError::forbidden("only members can post in this group")
        });
    }

    if let Some(parent_id) = parent_id {
        let parent = match db.get_message(parent_id) {
            Ok(parent) => parent,
            Err(cohort_store::StoreError::NotFound(_)) => {
                return Err(ChatError::invalid("reply parent does not exist"))
            }
            Err(e) => return Err(e.into()),
        };
        if parent.group_id != group_id {
            return Err(ChatError::invalid("reply parent belongs to another group"));
        }
        if parent.is_reply() {
            return Err(ChatError::invalid("replies can only target top-level messages"));
        }
    }
    Ok(group)
}

/// Post a message to a group.
pub fn send(db: &mut Database, user: &UserId, group_id: GroupId, draft: Draft) -> ChatResult<Outcome<Message>> {
    let group = authorize_post(db, user, group_id, draft.parent_id)?;

    let mut mentions = Vec::new();
    let mut seen = BTreeSet::new();
    for mentioned in &draft.mentions {
        if !seen.insert(mentioned.clone()) {
            continue;
        }
        let reachable = if group.is_announcement {
            db.community_role(mentioned)?.is_some()
        } else {
            group.is_member(mentioned)
        };
        if reachable {
            mentions.push(mentioned.clone());
        }
    }

    let parent_id = draft.parent_id;
    let classified = classify(draft)?;
    let new = NewMessage {
        id: MessageId::new(),
        group_id,
        sender_id: user.clone(),
        kind: classified.kind,
        content: classified.content,
        poll: classified.poll,
        event: classified.event,
        mentions,
        parent_id,
        created_at: Utc::now(),
    };
    db.insert_message(&new)?;
    let message = db.get_message(new.id)?;

    info!(
        message = %message.id,
        group = %group_id,
        sender = %user,
        kind = message.kind.as_str(),
        reply = message.is_reply(),
        "message sent"
    );

    let mut outcome = Outcome::quiet(message.clone());
    for mentioned in message.mentions.iter().filter(|m| *m != user) {
        outcome = outcome.notify(
            Targets::user(mentioned),
            ServerEvent::Mentioned {
                group_id,
                message_id: message.id,
                by: message.sender.clone(),
            },
        );
    }
    Ok(outcome.notify(Targets::group(group_id), ServerEvent::NewMessage(message)))
}

/// Delete a message as its sender or a group admin.
pub fn delete(db: &mut Database, user: &UserId, message_id: MessageId) -> ChatResult<Outcome<()>> {
    let message = db.get_message(message_id)?;
    let group = db.get_group(message.group_id)?;
    if &message.sender.id != user && !group.is_admin(user) {
        return Err(ChatError::forbidden("only the sender or a group admin can delete this message"));
    }
    remove_message(db, &message)
}

/// Delete without an authorization check; moderation goes through here too.
/// Replies removed with a parent get their own `messageDeleted`.
pub(crate) fn remove_message(db: &mut Database, message: &Message) -> ChatResult<Outcome<()>> {
    let deletion = db.delete_message(message.id)?.unwrap_or_default();
    info!(
        message = %message.id,
        group = %message.group_id,
        replies = deletion.replies.len(),
        "message deleted"
    );

    let group_id = message.group_id;
    let mut outcome = Outcome::quiet(()).notify(
        Targets::group(group_id),
        ServerEvent::MessageDeleted {
            message_id: message.id,
            group_id,
            parent_id: message.parent_id,
        },
    );
    for reply in deletion.replies {
        outcome = outcome.notify(
            Targets::group(group_id),
            ServerEvent::MessageDeleted {
                message_id: reply,
                group_id,
                parent_id: Some(message.id),
            },
        );
    }
    if deletion.unpinned {
        outcome = outcome.notify(
            Targets::group(group_id),
            ServerEvent::PinUpdated {
                group_id,
                pinned_message: None,
            },
        );
    }
    Ok(outcome)
}

/// Pin a message, replacing any current pin, or unpin it if it is the
/// pinned one. Returns the group's pinned message afterwards.
pub fn toggle_pin(db: &mut Database, user: &UserId, message_id: MessageId) -> ChatResult<Outcome<Option<Message>>> {
    let message = db.get_message(message_id)?;
    let group = db.get_group(message.group_id)?;
    require_group_admin(&group, user)?;

    let target = if message.is_pinned { None } else { Some(message.id) };
    db.set_pinned(group.id, target)?;
    let pinned = db.pinned_message(group.id)?;

    info!(group = %group.id, message = %message.id, pinned = target.is_some(), "pin toggled");

    Ok(Outcome::quiet(pinned.clone()).notify(
        Targets::group(group.id),
        ServerEvent::PinUpdated {
            group_id: group.id,
            pinned_message: pinned,
        },
    ))
}

pub fn pinned(db: &Database, user: &UserId, group_id: GroupId) -> ChatResult<Option<Message>> {
    readable_group(db, user, group_id)?;
    Ok(db.pinned_message(group_id)?)
}

pub fn get_message(db: &Database, user: &UserId, message_id: MessageId) -> ChatResult<Message> {
    readable_message(db, user, message_id).map(|(message, _)| message)
}

/// Toggle the user's reaction. One reaction per user per message: a new
/// emoji replaces the old one, the same emoji removes it.
pub fn react(db: &mut Database, user: &UserId, message_id: MessageId, emoji: &str) -> ChatResult<Outcome<Vec<Reaction>>> {
    validate_emoji(emoji)?;
    let emoji = emoji.trim();
    let (message, _) = readable_message(db, user, message_id)?;

    let mut reactions = message.reactions;
    let current = toggle_reaction(&mut reactions, user, emoji);
    db.set_user_reaction(message_id, user, current.as_deref())?;

    Ok(reaction_outcome(message_id, message.group_id, reactions))
}

pub fn remove_reaction(
    db: &mut Database,
    user: &UserId,
    message_id: MessageId,
    emoji: &str,
) -> ChatResult<Outcome<Vec<Reaction>>> {
    let emoji = emoji.trim();
    let (message, _) = readable_message(db, user, message_id)?;

    let mut reactions = message.reactions;
    if !strip_reaction(&mut reactions, user, emoji) {
        return Ok(Outcome::quiet(reactions));
    }
    db.remove_reaction(message_id, user, emoji)?;

    Ok(reaction_outcome(message_id, message.group_id, reactions))
}

fn reaction_outcome(message_id: MessageId, group_id: GroupId, reactions: Vec<Reaction>) -> Outcome<Vec<Reaction>> {
    Outcome::quiet(reactions.clone()).notify(
        Targets::group(group_id),
        ServerEvent::ReactionUpdated {
            message_id,
            group_id,
            reactions,
        },
    )
}

pub fn vote_poll(
    db: &mut Database,
    user: &UserId,
    message_id: MessageId,
    option_index: usize,
) -> ChatResult<Outcome<PollData>> {
    let (message, _) = readable_message(db, user, message_id)?;
    if message.kind != MessageKind::Poll {
        return Err(ChatError::NotAPoll);
    }
    let mut poll = message.poll.ok_or(ChatError::NotAPoll)?;

    poll.toggle_vote(user, option_index)?;
    db.update_poll(message_id, &poll)?;

    Ok(Outcome::quiet(poll.clone()).notify(
        Targets::group(message.group_id),
        ServerEvent::PollUpdated {
            message_id,
            group_id: message.group_id,
            poll_data: poll,
        },
    ))
}

/// Toggle the user's RSVP on an event message.
pub fn join_event(db: &mut Database, user: &UserId, message_id: MessageId) -> ChatResult<Outcome<EventData>> {
    let (message, _) = readable_message(db, user, message_id)?;
    if message.kind != MessageKind::Event {
        return Err(ChatError::NotAnEvent);
    }
    let mut event = message.event.ok_or(ChatError::NotAnEvent)?;

    event.toggle_attendance(user);
    db.update_event(message_id, &event)?;

    Ok(Outcome::quiet(event.clone()).notify(
        Targets::group(message.group_id),
        ServerEvent::EventUpdated {
            message_id,
            group_id: message.group_id,
            event_data: event,
        },
    ))
}

pub fn clear_group_messages(db: &mut Database, user: &UserId, group_id: GroupId) -> ChatResult<Outcome<usize>> {
    let group = db.get_group(group_id)?;
    require_group_admin(&group, user)?;

    let removed = db.clear_group(group_id)?;
    info!(group = %group_id, removed, by = %user, "chat cleared");

    Ok(Outcome::quiet(removed).notify(Targets::group(group_id), ServerEvent::ChatCleared { group_id }))
}

/// A page of top-level messages older than `before`, oldest first.
pub fn list_messages(
    db: &Database,
    user: &UserId,
    group_id: GroupId,
    before: Option<MessageId>,
    limit: u32,
) -> ChatResult<Vec<Message>> {
    readable_group(db, user, group_id)?;
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    Ok(db.list_top_level(group_id, before, limit)?)
}

pub fn list_thread(db: &Database, user: &UserId, parent_id: MessageId) -> ChatResult<Vec<Message>> {
    readable_message(db, user, parent_id)?;
    Ok(db.list_replies(parent_id)?)
}
