//! Flat domain records shared by the selector, the gate and the service loops.
//!
//! Everything here is constructed on fetch by the [`GitHubGateway`](crate::github::gateway::GitHubGateway)
//! implementation (or by a test stand-in) and never mutated afterwards.

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumIter};

use crate::locator::PrLocator;

/// Lifecycle state of a pull request as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
    Unknown,
}

impl PrState {
    pub fn parse(raw: &str, merged: bool) -> Self {
        match raw {
            "open" => PrState::Open,
            "closed" if merged => PrState::Merged,
            "closed" => PrState::Closed,
            _ => PrState::Unknown,
        }
    }
}

/// Aggregated CI verdict for the head commit of a pull request.
#[derive(Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    #[strum(serialize = "passing")]
    Passing,
    #[strum(serialize = "pending")]
    Pending,
    #[strum(serialize = "queued")]
    Queued,
    #[strum(serialize = "running")]
    Running,
    #[strum(serialize = "failing")]
    Failing,
    #[strum(serialize = "unknown")]
    Unknown,
}

impl TestState {
    /// Folds the commit's combined-status verdict and the most advanced check-run state into a
    /// single value. Check-run activity wins over a merely-pending combined status because it is
    /// the more precise signal.
    pub fn from_host(combined_status: &str, check_run_status: Option<&str>) -> Self {
        match check_run_status {
            Some("queued") => return TestState::Queued,
            Some("in_progress") => return TestState::Running,
            _ => {}
        }

        match combined_status {
            "success" => TestState::Passing,
            "pending" => TestState::Pending,
            "failure" | "error" => TestState::Failing,
            _ => TestState::Unknown,
        }
    }
}

/// Change status of a single file within a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

impl FileStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "added" => FileStatus::Added,
            "removed" | "deleted" => FileStatus::Deleted,
            // renames and copies still carry a reviewable patch
            _ => FileStatus::Modified,
        }
    }
}

/// One changed file of a pull request. `patch` may be empty for binary or oversized files.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub filename: String,
    pub additions: u32,
    pub deletions: u32,
    pub status: FileStatus,
    pub patch: String,
}

impl ChangedFile {
    /// Total churn of the file; the measure used to pick the PR's most influential files.
    pub fn churn(&self) -> u32 {
        self.additions + self.deletions
    }
}

/// A fully-hydrated pull request, the unit of work for the gate and the selector.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub author: String,
    pub title: String,
    pub state: PrState,
    pub draft: bool,
    pub requested_reviewers: Vec<String>,
    pub assignees: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_review_at: Option<DateTime<Utc>>,
    pub test_state: TestState,
    pub changed_files: Vec<ChangedFile>,
}

impl PullRequest {
    pub fn locator(&self) -> PrLocator {
        PrLocator {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            number: self.number,
        }
    }

    /// The most recent commit-or-review activity; falls back to the host's `updated_at` when
    /// neither is known.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        match (self.last_commit_at, self.last_review_at) {
            (Some(commit), Some(review)) => commit.max(review),
            (Some(commit), None) => commit,
            (None, Some(review)) => review,
            (None, None) => self.updated_at,
        }
    }
}

/// A merged pull request surfaced by one of the history queries (file history, blame, recent
/// merges, directory history). `merger` is empty when the host does not report who merged it.
#[derive(Debug, Clone, Default)]
pub struct HistoricalPullRequest {
    pub number: u64,
    pub author: String,
    pub merger: String,
    pub approvers: Vec<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub attributed_lines: u32,
}

/// One deployment of the service into an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub id: u64,
    pub org: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_folds_check_runs_over_combined_status() {
        assert_eq!(TestState::from_host("pending", Some("queued")), TestState::Queued);
        assert_eq!(TestState::from_host("pending", Some("in_progress")), TestState::Running);
        assert_eq!(TestState::from_host("success", None), TestState::Passing);
        assert_eq!(TestState::from_host("failure", Some("completed")), TestState::Failing);
        assert_eq!(TestState::from_host("gibberish", None), TestState::Unknown);
    }

    #[test]
    fn last_activity_prefers_the_most_recent_signal() {
        let commit = Utc.ymd(2021, 3, 1).and_hms(12, 0, 0);
        let review = Utc.ymd(2021, 3, 2).and_hms(12, 0, 0);
        let updated = Utc.ymd(2021, 2, 1).and_hms(12, 0, 0);

        let mut pr = PullRequest {
            owner: "acme".to_string(),
            repo: "rockets".to_string(),
            number: 7,
            author: "wile".to_string(),
            title: "Add afterburner".to_string(),
            state: PrState::Open,
            draft: false,
            requested_reviewers: Vec::new(),
            assignees: Vec::new(),
            created_at: updated,
            updated_at: updated,
            last_commit_at: Some(commit),
            last_review_at: Some(review),
            test_state: TestState::Unknown,
            changed_files: Vec::new(),
        };
        assert_eq!(pr.last_activity_at(), review);

        pr.last_review_at = None;
        assert_eq!(pr.last_activity_at(), commit);

        pr.last_commit_at = None;
        assert_eq!(pr.last_activity_at(), updated);
    }
}
