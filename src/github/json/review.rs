use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::github::json::user::User;

/// Custom wrapper for one entry of `GET repos/{owner}/{repo}/pulls/{n}/reviews`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewJson {
    #[serde(default)]
    pub user: Option<User>,
    // Github reports the state in SCREAMING_SNAKE_CASE on this endpoint
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}
