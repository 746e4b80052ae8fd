use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::github::json::user::User;

/// Custom wrapper for a GitHub pull request, as served by `GET repos/{owner}/{repo}/pulls/{n}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestJson {
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    pub user: User,
    #[serde(default)]
    pub assignees: Vec<User>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub head: GitReference,
}

/// The tip of one side of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitReference {
    pub sha: String,
}
