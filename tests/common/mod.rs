//! Shared test support: a fully in-memory stand-in for the host gateway, plus builders for the
//! GraphQL payloads the selection engine consumes.

// not every test binary exercises every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use prefect::error::AssignError;
use prefect::github::events::{EventConnector, EventSource};
use prefect::github::gateway::GitHubGateway;
use prefect::locator::PrLocator;
use prefect::model::{ChangedFile, FileStatus, Installation, PrState, PullRequest, TestState};

/// Scripted, thread-safe gateway stand-in. Everything is keyed by plain strings so tests can
/// seed exactly the host state a scenario needs.
#[derive(Default)]
pub struct StubHost {
    /// `owner/repo` -> collaborator logins with write access.
    pub collaborators: Mutex<HashMap<String, Vec<String>>>,
    /// `owner/repo#number` -> pull request.
    pub pull_requests: Mutex<HashMap<String, PullRequest>>,
    /// `owner/repo#number` -> changed files.
    pub files: Mutex<HashMap<String, Vec<ChangedFile>>>,
    /// login -> host-reported account type (defaults to `User`).
    pub user_types: Mutex<HashMap<String, String>>,
    /// `org:login` -> open authored PR count (defaults to 0).
    pub open_pr_counts: Mutex<HashMap<String, u32>>,
    /// path -> blame-query response data.
    pub blame: Mutex<HashMap<String, Value>>,
    /// path -> history-query response data (files and directories alike).
    pub history: Mutex<HashMap<String, Value>>,
    /// Sequential pages for the recent-merged query.
    pub recent_pages: Mutex<Vec<Value>>,
    pub installations: Mutex<Vec<Installation>>,
    /// org -> open PR locators.
    pub open_prs: Mutex<HashMap<String, Vec<PrLocator>>>,
    /// Every `add_reviewers` call: (locator, reviewers).
    pub assigned: Mutex<Vec<(String, Vec<String>)>>,
    /// When set, `collaborators()` fails; exercises the one fatal selector path.
    pub fail_collaborators: AtomicBool,
}

impl StubHost {
    pub fn new() -> Self {
        StubHost::default()
    }

    pub fn seed_collaborators(&self, owner: &str, repo: &str, logins: &[&str]) {
        self.collaborators.lock().unwrap().insert(
            format!("{}/{}", owner, repo),
            logins.iter().map(|login| login.to_string()).collect(),
        );
    }

    pub fn seed_pr(&self, pr: PullRequest) {
        self.pull_requests.lock().unwrap().insert(pr.locator().to_string(), pr);
    }

    pub fn seed_files(&self, owner: &str, repo: &str, number: u64, files: Vec<ChangedFile>) {
        self.files
            .lock()
            .unwrap()
            .insert(PrLocator::new(owner, repo, number).to_string(), files);
    }

    pub fn seed_open_pr_count(&self, org: &str, login: &str, count: u32) {
        self.open_pr_counts.lock().unwrap().insert(format!("{}:{}", org, login), count);
    }

    pub fn assignments(&self) -> Vec<(String, Vec<String>)> {
        self.assigned.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitHubGateway for StubHost {
    async fn installations(&self) -> Result<Vec<Installation>, AssignError> {
        Ok(self.installations.lock().unwrap().clone())
    }

    async fn installation_token(&self, _org: &str) -> Result<String, AssignError> {
        Ok("stub-token".to_string())
    }

    async fn pull_request(&self, locator: &PrLocator) -> Result<PullRequest, AssignError> {
        self.pull_requests
            .lock()
            .unwrap()
            .get(&locator.to_string())
            .cloned()
            .ok_or_else(|| AssignError::PullRequestNotFound {
                repo_name: format!("{}/{}", locator.owner, locator.repo),
                pr_number: locator.number,
                nested: anyhow::anyhow!("not seeded"),
            })
    }

    async fn open_pull_requests(&self, org: &str) -> Result<Vec<PrLocator>, AssignError> {
        Ok(self.open_prs.lock().unwrap().get(org).cloned().unwrap_or_default())
    }

    async fn changed_files(
        &self, locator: &PrLocator,
    ) -> Result<Vec<ChangedFile>, AssignError> {
        Ok(self.files.lock().unwrap().get(&locator.to_string()).cloned().unwrap_or_default())
    }

    async fn file_patch(
        &self, locator: &PrLocator, filename: &str,
    ) -> Result<String, AssignError> {
        Ok(self
            .changed_files(locator)
            .await?
            .into_iter()
            .find(|file| file.filename == filename)
            .map(|file| file.patch)
            .unwrap_or_default())
    }

    async fn collaborators(
        &self, owner: &str, repo: &str,
    ) -> Result<Vec<String>, AssignError> {
        if self.fail_collaborators.load(Ordering::SeqCst) {
            return Err(AssignError::GitHubAPIError {
                msg: "collaborators unavailable".to_string(),
                nested: anyhow::anyhow!("scripted failure"),
            });
        }

        Ok(self
            .collaborators
            .lock()
            .unwrap()
            .get(&format!("{}/{}", owner, repo))
            .cloned()
            .unwrap_or_default())
    }

    async fn open_pr_count(&self, org: &str, username: &str) -> Result<u32, AssignError> {
        Ok(self
            .open_pr_counts
            .lock()
            .unwrap()
            .get(&format!("{}:{}", org, username))
            .copied()
            .unwrap_or(0))
    }

    async fn user_type(&self, _org: &str, username: &str) -> Result<String, AssignError> {
        Ok(self
            .user_types
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_else(|| "User".to_string()))
    }

    async fn add_reviewers(
        &self, locator: &PrLocator, reviewers: &[String],
    ) -> Result<(), AssignError> {
        self.assigned.lock().unwrap().push((locator.to_string(), reviewers.to_vec()));
        Ok(())
    }

    async fn graph_query(
        &self, _org: &str, query: &str, variables: Value,
    ) -> Result<Value, AssignError> {
        let path = variables.get("path").and_then(|value| value.as_str()).unwrap_or_default();

        if query.contains("blame(") {
            return Ok(self.blame.lock().unwrap().get(path).cloned().unwrap_or(Value::Null));
        }

        if query.contains("history(") {
            return Ok(self.history.lock().unwrap().get(path).cloned().unwrap_or(Value::Null));
        }

        if query.contains("states: MERGED") {
            let pages = self.recent_pages.lock().unwrap();
            let index = match variables.get("cursor").and_then(|value| value.as_str()) {
                None => 0,
                Some(cursor) => cursor.trim_start_matches("page-").parse().unwrap_or(0),
            };
            return Ok(pages.get(index).cloned().unwrap_or(Value::Null));
        }

        Ok(Value::Null)
    }
}

/// An event connector that never connects; monitors built over it exercise only their
/// synchronous surface.
pub struct NullConnector;

#[async_trait]
impl EventConnector for NullConnector {
    async fn connect(
        &self, org: &str, _token: &str,
    ) -> Result<Box<dyn EventSource>, AssignError> {
        Err(AssignError::EventStreamError {
            org: org.to_string(),
            msg: "no event bus in tests".to_string(),
        })
    }
}

// model builders ---

/// An eligible, open, passing PR updated two hours ago.
pub fn base_pr(owner: &str, repo: &str, number: u64, author: &str) -> PullRequest {
    let now = Utc::now();

    PullRequest {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
        author: author.to_string(),
        title: format!("Change #{}", number),
        state: PrState::Open,
        draft: false,
        requested_reviewers: Vec::new(),
        assignees: Vec::new(),
        created_at: now - Duration::hours(10),
        updated_at: now - Duration::hours(2),
        last_commit_at: Some(now - Duration::hours(2)),
        last_review_at: None,
        test_state: TestState::Passing,
        changed_files: Vec::new(),
    }
}

pub fn changed_file(filename: &str, additions: u32, deletions: u32, patch: &str) -> ChangedFile {
    ChangedFile {
        filename: filename.to_string(),
        additions,
        deletions,
        status: FileStatus::Modified,
        patch: patch.to_string(),
    }
}

/// A patch whose only content is `added` fresh lines, for seeding historical contributions.
pub fn synthetic_patch(added: u32) -> String {
    let mut patch = format!("@@ -1,0 +1,{} @@\n", added);
    for line in 0..added {
        patch.push_str(&format!("+line {}\n", line));
    }
    patch
}

// GraphQL payload builders ---

pub fn pull_node(number: u64, author: &str, merger: &str, approvers: &[&str]) -> Value {
    let merged_at = (Utc::now() - Duration::days(30)).to_rfc3339();

    json!({
        "number": number,
        "mergedAt": merged_at,
        "author": { "login": author },
        "mergedBy": { "login": merger },
        "reviews": { "nodes": approvers
            .iter()
            .map(|approver| json!({ "author": { "login": approver } }))
            .collect::<Vec<Value>>() }
    })
}

pub fn commit_node(author: &str, pull: Option<Value>) -> Value {
    let pulls: Vec<Value> = pull.into_iter().collect();

    json!({
        "author": { "user": { "login": author } },
        "associatedPullRequests": { "nodes": pulls }
    })
}

pub fn history_data(commits: Vec<Value>) -> Value {
    json!({
        "repository": { "defaultBranchRef": { "target": { "history": { "nodes": commits } } } }
    })
}

pub fn blame_range(start: u32, end: u32, commit: Value) -> Value {
    json!({ "startingLine": start, "endingLine": end, "commit": commit })
}

pub fn blame_data(ranges: Vec<Value>) -> Value {
    json!({
        "repository": { "defaultBranchRef": { "target": { "blame": { "ranges": ranges } } } }
    })
}

pub fn merged_page(nodes: Vec<Value>, next_cursor: Option<&str>) -> Value {
    json!({
        "repository": { "pullRequests": {
            "pageInfo": {
                "hasNextPage": next_cursor.is_some(),
                "endCursor": next_cursor.unwrap_or("")
            },
            "nodes": nodes
        } }
    })
}

// invariant helpers ---

/// Asserts the universal ranking invariants: author exclusion, bounded length, and score
/// arithmetic.
pub fn assert_ranking_invariants(
    ranked: &[prefect::selection::candidate::Candidate], author: &str,
) {
    assert!(ranked.len() <= 5, "ranking may not exceed 5 candidates");

    for candidate in ranked {
        assert_ne!(candidate.username(), author, "the author may never be ranked");

        let weight: u32 = candidate.breakdown().values().sum();
        assert_eq!(candidate.weight(), weight, "weight must equal the sum of its sources");
        assert!(
            candidate.penalty() <= weight / 2,
            "the workload penalty may not exceed half the weight"
        );
        assert_eq!(
            candidate.final_score(),
            weight - candidate.penalty(),
            "the final score must be weight minus penalty"
        );
    }
}
