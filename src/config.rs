//! Process configuration, gathered once at startup from the environment.
//!
//! The teacher reads individual `env::var` calls inline where needed;
//! here they're centralized into one struct because the rate controller
//! and provider client both need several of these values at construction
//! time, before any handler runs.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_file: String,
    pub challonge_api_base: String,
    pub challonge_legacy_key: Option<String>,
    pub challonge_oauth_client_id: Option<String>,
    pub challonge_oauth_client_secret: Option<String>,
    pub challonge_oauth_redirect_uri: Option<String>,
    pub bind_addr: std::net::SocketAddr,

    pub mode_rate_idle: u32,
    pub mode_rate_upcoming: u32,
    pub mode_rate_active: u32,
    pub manual_cap: u32,
    pub check_interval: Duration,
    pub upcoming_window: Duration,
}

impl Config {
    /// Load configuration from the environment, falling back to sane
    /// defaults for local development — mirrors the teacher's
    /// `DATABASE_FILE` fallback to `:memory:`.
    pub fn from_env() -> Self {
        Self {
            database_file: std::env::var("DATABASE_FILE").unwrap_or_else(|_| ":memory:".to_string()),
            challonge_api_base: std::env::var("CHALLONGE_API_BASE")
                .unwrap_or_else(|_| "https://api.challonge.com/v2".to_string()),
            challonge_legacy_key: std::env::var("CHALLONGE_LEGACY_KEY").ok(),
            challonge_oauth_client_id: std::env::var("CHALLONGE_OAUTH_CLIENT_ID").ok(),
            challonge_oauth_client_secret: std::env::var("CHALLONGE_OAUTH_CLIENT_SECRET").ok(),
            challonge_oauth_redirect_uri: std::env::var("CHALLONGE_OAUTH_REDIRECT_URI").ok(),
            bind_addr: std::env::var("BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| std::net::SocketAddr::from(([0, 0, 0, 0], 5000))),

            mode_rate_idle: env_u32("RATE_IDLE_PER_MIN", 6),
            mode_rate_upcoming: env_u32("RATE_UPCOMING_PER_MIN", 20),
            mode_rate_active: env_u32("RATE_ACTIVE_PER_MIN", 60),
            manual_cap: env_u32("RATE_MANUAL_CAP", 60).clamp(1, 60),
            check_interval: Duration::from_secs(env_u32("CHECK_INTERVAL_SECS", 8 * 3600) as u64),
            upcoming_window: Duration::from_secs(env_u32("UPCOMING_WINDOW_SECS", 48 * 3600) as u64),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
