pub mod constants;
pub mod content;
pub mod error;
pub mod report;
pub mod types;

pub use error::{ChatError, ChatResult};
pub use types::{GroupId, MessageId, ReportId, UserId, UserSummary};
