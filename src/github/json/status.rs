use serde::Deserialize;

/// Custom wrapper for `GET repos/{owner}/{repo}/commits/{sha}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStatus {
    /// `"success"`, `"pending"` or `"failure"`.
    pub state: String,
    #[serde(default)]
    pub total_count: u64,
}

/// Custom wrapper for `GET repos/{owner}/{repo}/commits/{sha}/check-runs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRuns {
    #[serde(default)]
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    /// `"queued"`, `"in_progress"` or `"completed"`.
    #[serde(default)]
    pub status: String,
    /// Only meaningful once `status` is `"completed"`.
    #[serde(default)]
    pub conclusion: Option<String>,
}
