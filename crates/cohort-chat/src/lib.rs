//! # cohort-chat
//!
//! The group-chat engine: membership and permissions, the message
//! lifecycle, realtime fan-out and unread tracking.
//!
//! Operations are plain functions over a [`cohort_store::Database`] that
//! return an [`events::Outcome`]: the result plus the notifications it owes.
//! [`Chat`] runs them under the database lock and publishes the
//! notifications through the [`hub::Hub`] after the store has committed.

pub mod chat;
pub mod community;
pub mod events;
pub mod hub;
pub mod membership;
pub mod messages;
pub mod moderation;
pub mod unread;

#[cfg(test)]
mod testutil;

pub use chat::Chat;
pub use events::{ChannelKey, ClientEvent, Dispatch, Outcome, ServerEvent, Targets};
pub use hub::{ConnectionId, EventReceiver, Hub};
pub use membership::Capabilities;
pub use messages::{Attachment, Draft};
pub use unread::GroupView;
