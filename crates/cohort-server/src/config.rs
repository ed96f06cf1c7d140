//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use cohort_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MAX_UPLOAD_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./cohort.db`
    pub database_path: PathBuf,

    /// Directory where uploaded attachments are stored.
    /// Env: `UPLOAD_PATH`
    /// Default: `./uploads`
    pub upload_path: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 25 MiB
    pub max_upload_size: usize,

    /// Messages returned by a history request without `limit`.
    /// Env: `PAGE_SIZE`
    /// Default: `50`
    pub page_size: u32,

    /// Enroll every authenticated user in the community on first contact.
    /// Env: `AUTO_JOIN_COMMUNITY` (true/false)
    /// Default: `true`
    pub auto_join_community: bool,

    /// Allowed CORS origin. `None` allows any origin.
    /// Env: `CORS_ORIGIN`
    pub cors_origin: Option<String>,

    /// Sustained requests per second per client.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./cohort.db"),
            upload_path: PathBuf::from("./uploads"),
            max_upload_size: MAX_UPLOAD_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            auto_join_community: true,
            cors_origin: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("UPLOAD_PATH") {
            config.upload_path = PathBuf::from(path);
        }

        parse_into(&lookup, "MAX_UPLOAD_SIZE", &mut config.max_upload_size);
        parse_into(&lookup, "PAGE_SIZE", &mut config.page_size);
        config.page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);

        if let Some(val) = lookup("AUTO_JOIN_COMMUNITY") {
            config.auto_join_community = val != "false" && val != "0";
        }

        if let Some(origin) = lookup("CORS_ORIGIN") {
            let origin = origin.trim();
            if !origin.is_empty() && origin != "*" {
                config.cors_origin = Some(origin.to_string());
            }
        }

        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

/// Overwrite `slot` with the parsed value of `key`, keeping the default and
/// warning when the value does not parse.
fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Invalid setting, using default");
        }
    }
}
