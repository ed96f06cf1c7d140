//! # cohort-store
//!
//! Persistent store for the Cohort chat backend, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Multi-row mutations (reply bookkeeping, pin exclusivity, group
//! deletion) run inside a single transaction so no partial state is ever
//! observable.

pub mod codec;
pub mod community;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod reads;
pub mod reports;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
