/// Application name
pub const APP_NAME: &str = "Cohort";

/// Name given to the announcement group created with the community
pub const ANNOUNCEMENT_GROUP_NAME: &str = "Announcements";

/// Description given to the announcement group
pub const ANNOUNCEMENT_GROUP_DESCRIPTION: &str = "Community-wide announcements from the admins";

/// Default number of messages returned per page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on a requested page size
pub const MAX_PAGE_SIZE: u32 = 200;

/// Maximum length of a text message in characters
pub const MAX_TEXT_LEN: usize = 4_000;

/// Maximum length of a group name in characters
pub const MAX_GROUP_NAME_LEN: usize = 80;

/// Maximum number of options in a poll
pub const MAX_POLL_OPTIONS: usize = 10;

/// Maximum length of a reaction emoji (bytes); covers ZWJ sequences
pub const MAX_EMOJI_LEN: usize = 32;

/// Maximum attachment size in bytes (25 MiB)
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 5000;
