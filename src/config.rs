//! Process configuration, assembled from CLI flags and environment variables by the binary and
//! handed to the library as one immutable [`Settings`] value.

use std::path::PathBuf;
use std::time::Duration;

use crate::gate::GateConfig;
use crate::selection::selector::SelectorConfig;

/// Default delay between two scheduler sweeps.
pub const DEFAULT_LOOP_DELAY: Duration = Duration::from_secs(5 * 60);
/// Default lower bound of the activity window a PR must fall into to be considered.
pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(2 * 60);
/// Default upper bound of the activity window; PRs dormant for longer are left alone.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(90 * 24 * 60 * 60);
/// Default TTL for the per-user open-PR-count lookups feeding the workload penalty.
pub const DEFAULT_PR_COUNT_TTL: Duration = Duration::from_secs(6 * 60 * 60);
/// Default port for the operational HTTP surface.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default push-event bus endpoint.
pub const DEFAULT_EVENT_SERVER: &str = "https://events.prefect-bot.dev/watch";
/// Reconnection attempts after which a monitor's connection manager gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 100;

/// Immutable process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// GitHub App id; mandatory for service mode.
    pub app_id: Option<u64>,
    /// Path to the App's RS256 private key (PEM).
    pub private_key_path: Option<PathBuf>,
    /// Personal access token; the single-shot path accepts it in place of App credentials.
    pub github_token: Option<String>,
    pub event_server_url: String,
    pub loop_delay: Duration,
    pub dry_run: bool,
    pub min_age: Duration,
    pub max_age: Duration,
    pub pr_count_ttl: Duration,
    /// Optional hard ceiling on a candidate's open authored PRs; above it the candidate is
    /// rejected outright instead of merely penalized.
    pub max_reviewer_load: Option<u32>,
    pub http_port: u16,
    /// Additional logins to treat as bots besides the host-reported type and name heuristics.
    pub bot_logins: Vec<String>,
    pub max_reconnect_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_id: None,
            private_key_path: None,
            github_token: None,
            event_server_url: DEFAULT_EVENT_SERVER.to_string(),
            loop_delay: DEFAULT_LOOP_DELAY,
            dry_run: false,
            min_age: DEFAULT_MIN_AGE,
            max_age: DEFAULT_MAX_AGE,
            pr_count_ttl: DEFAULT_PR_COUNT_TTL,
            max_reviewer_load: None,
            http_port: DEFAULT_HTTP_PORT,
            bot_logins: Vec::new(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl Settings {
    /// The slice of settings the eligibility gate cares about.
    pub fn gate(&self) -> GateConfig {
        GateConfig {
            min_age: chrono::Duration::from_std(self.min_age)
                .unwrap_or_else(|_| chrono::Duration::minutes(2)),
            max_age: chrono::Duration::from_std(self.max_age)
                .unwrap_or_else(|_| chrono::Duration::days(90)),
        }
    }

    /// The slice of settings the selector cares about.
    pub fn selector(&self) -> SelectorConfig {
        SelectorConfig {
            pr_count_ttl: self.pr_count_ttl,
            max_reviewer_load: self.max_reviewer_load,
            bot_logins: self.bot_logins.clone(),
        }
    }
}
