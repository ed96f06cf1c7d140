//! Message payload types and the toggle laws that mutate them.
//!
//! Every mutation here is an idempotent set toggle rather than a counter
//! delta, so duplicate deliveries or last-write-wins races never break the
//! one-reaction-per-user and one-vote-per-user invariants.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_EMOJI_LEN, MAX_POLL_OPTIONS};
use crate::error::{ChatError, ChatResult};
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Poll,
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Poll => "poll",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "poll" => Some(Self::Poll),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    /// Kind of a message carrying an uploaded binary with the given MIME type.
    pub fn for_attachment(content_type: &str) -> Self {
        if content_type.trim().to_ascii_lowercase().starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
}

pub fn validate_emoji(emoji: &str) -> ChatResult<()> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::invalid("emoji must not be empty"));
    }
    if emoji.len() > MAX_EMOJI_LEN || emoji.chars().any(char::is_whitespace) {
        return Err(ChatError::invalid("emoji must be a single short token"));
    }
    Ok(())
}

/// Apply a reaction click by `user`.
///
/// Any existing reaction by the user is removed first. Clicking the same
/// emoji again leaves it removed; clicking a different one switches to it.
/// Returns the user's reaction after the toggle.
pub fn toggle_reaction(reactions: &mut Vec<Reaction>, user: &UserId, emoji: &str) -> Option<String> {
    let previous = reactions
        .iter()
        .position(|r| &r.user_id == user)
        .map(|idx| reactions.remove(idx).emoji);
    reactions.retain(|r| &r.user_id != user);

    if previous.as_deref() == Some(emoji) {
        return None;
    }

    reactions.push(Reaction {
        emoji: emoji.to_string(),
        user_id: user.clone(),
    });
    Some(emoji.to_string())
}

/// Strip the `(user, emoji)` pair. Returns whether anything was removed.
pub fn strip_reaction(reactions: &mut Vec<Reaction>, user: &UserId, emoji: &str) -> bool {
    let before = reactions.len();
    reactions.retain(|r| !(&r.user_id == user && r.emoji == emoji));
    reactions.len() != before
}

// ---------------------------------------------------------------------------
// Polls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub votes: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollData {
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub allow_multiple: bool,
}

impl PollData {
    pub fn new(question: impl Into<String>, options: &[&str], allow_multiple: bool) -> Self {
        Self {
            question: question.into(),
            options: options
                .iter()
                .map(|text| PollOption {
                    text: text.to_string(),
                    votes: BTreeSet::new(),
                })
                .collect(),
            allow_multiple,
        }
    }

    /// Normalize a client-submitted poll: trims text and drops any votes the
    /// client tried to seed.
    pub fn sanitized(mut self) -> ChatResult<Self> {
        self.question = self.question.trim().to_string();
        if self.question.is_empty() {
            return Err(ChatError::invalid("poll question must not be empty"));
        }
        if self.options.len() < 2 {
            return Err(ChatError::invalid("a poll needs at least two options"));
        }
        if self.options.len() > MAX_POLL_OPTIONS {
            return Err(ChatError::invalid(format!(
                "a poll may have at most {MAX_POLL_OPTIONS} options"
            )));
        }
        for option in &mut self.options {
            option.text = option.text.trim().to_string();
            if option.text.is_empty() {
                return Err(ChatError::invalid("poll options must not be blank"));
            }
            option.votes.clear();
        }
        Ok(self)
    }

    /// Index of the first option `user` voted for.
    pub fn vote_of(&self, user: &UserId) -> Option<usize> {
        self.options.iter().position(|o| o.votes.contains(user))
    }

    pub fn total_votes(&self) -> usize {
        self.options.iter().map(|o| o.votes.len()).sum()
    }

    /// Apply a vote click by `user` on `option_index`.
    ///
    /// Single-choice: the user's existing vote is removed wherever it is; a
    /// repeat click on the same option leaves it removed. Multi-choice: only
    /// the clicked option is toggled.
    pub fn toggle_vote(&mut self, user: &UserId, option_index: usize) -> ChatResult<()> {
        if option_index >= self.options.len() {
            return Err(ChatError::invalid(format!(
                "option index {option_index} out of range (poll has {} options)",
                self.options.len()
            )));
        }

        if self.allow_multiple {
            let votes = &mut self.options[option_index].votes;
            if !votes.remove(user) {
                votes.insert(user.clone());
            }
            return Ok(());
        }

        let previous = self.vote_of(user);
        for option in &mut self.options {
            option.votes.remove(user);
        }
        if previous != Some(option_index) {
            self.options[option_index].votes.insert(user.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub attendees: BTreeSet<UserId>,
}

impl EventData {
    pub fn sanitized(mut self) -> ChatResult<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(ChatError::invalid("event title must not be empty"));
        }
        self.description = self.description.trim().to_string();
        self.location = self.location.trim().to_string();
        self.attendees.clear();
        Ok(self)
    }

    /// Toggle RSVP. Returns `true` if the user is now attending.
    pub fn toggle_attendance(&mut self, user: &UserId) -> bool {
        if self.attendees.remove(user) {
            false
        } else {
            self.attendees.insert(user.clone());
            true
        }
    }
}
