//! The capability set the core consumes from the hosting platform.
//!
//! Every operation takes the organization (or owner) explicitly; there is deliberately no
//! "current organization" setter anywhere, so the sweep path and the push paths can interleave
//! freely over one shared handle. The selection engine is written against this trait so it can be
//! exercised with a fully in-memory stand-in.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AssignError;
use crate::locator::PrLocator;
use crate::model::{ChangedFile, Installation, PullRequest};

#[async_trait]
pub trait GitHubGateway: Send + Sync {
    /// Enumerates every organization this deployment is installed into.
    async fn installations(&self) -> Result<Vec<Installation>, AssignError>;

    /// A fresh-enough installation credential for `org`; handed to the event transport on each
    /// connect.
    async fn installation_token(&self, org: &str) -> Result<String, AssignError>;

    /// Fetches one fully-hydrated pull request (including its CI verdict and activity
    /// timestamps, excluding its changed files - those are served separately).
    async fn pull_request(&self, locator: &PrLocator) -> Result<PullRequest, AssignError>;

    /// Every open pull request across `org`, as locators; callers re-fetch each one in full.
    async fn open_pull_requests(&self, org: &str) -> Result<Vec<PrLocator>, AssignError>;

    /// The changed files of a pull request, with unified-diff patches where the host serves them.
    async fn changed_files(&self, locator: &PrLocator) -> Result<Vec<ChangedFile>, AssignError>;

    /// The unified-diff patch of a single file within a pull request; empty when unavailable.
    async fn file_patch(
        &self, locator: &PrLocator, filename: &str,
    ) -> Result<String, AssignError>;

    /// Logins of every collaborator holding write (push) access on the repository.
    async fn collaborators(&self, owner: &str, repo: &str)
        -> Result<Vec<String>, AssignError>;

    /// How many open pull requests `username` currently has authored across `org`.
    async fn open_pr_count(&self, org: &str, username: &str) -> Result<u32, AssignError>;

    /// The host-reported account type of `username` (`"User"`, `"Organization"`, `"Bot"`).
    async fn user_type(&self, org: &str, username: &str) -> Result<String, AssignError>;

    /// Requests reviews from `reviewers` on the given pull request.
    async fn add_reviewers(
        &self, locator: &PrLocator, reviewers: &[String],
    ) -> Result<(), AssignError>;

    /// Runs a GraphQL query under `org`'s installation credential and returns the `data`
    /// payload. Used for blame and the bulk historical queries.
    async fn graph_query(
        &self, org: &str, query: &str, variables: Value,
    ) -> Result<Value, AssignError>;
}
