//! The live [`GitHubGateway`] implementation.
//!
//! The [`octocrab`] client does the authenticated-request plumbing (header injection, base URL),
//! while every payload is parsed into this crate's own wire structs under [`crate::github::json`];
//! the host library's models are not trusted to cover the fields this service needs. One octocrab
//! client is kept per organization and rebuilt whenever the installation-token vault rotates that
//! organization's credential.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, trace, warn};
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::AssignError;
use crate::github::app::TokenSource;
use crate::github::gateway::GitHubGateway;
use crate::github::json::changed_file::ChangedFileJson;
use crate::github::json::collaborator::Collaborator;
use crate::github::json::commit::CommitJson;
use crate::github::json::pull_request::PullRequestJson;
use crate::github::json::review::ReviewJson;
use crate::github::json::search::SearchResults;
use crate::github::json::status::{CheckRuns, CombinedStatus};
use crate::github::json::user::User;
use crate::locator::PrLocator;
use crate::model::{ChangedFile, Installation, PrState, PullRequest, TestState};
use crate::nested;

const GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Pages fetched from list endpoints before giving up; 100 entries each.
const MAX_LIST_PAGES: u32 = 10;

struct OrgClient {
    token: String,
    octocrab: Arc<Octocrab>,
}

pub struct GitHubClient {
    tokens: TokenSource,
    http: reqwest::Client,
    clients: RwLock<HashMap<String, OrgClient>>,
}

impl GitHubClient {
    pub fn new(tokens: TokenSource, http: reqwest::Client) -> Self {
        GitHubClient {
            tokens,
            http,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// An octocrab client authenticated for `org`, rebuilt when the vault rotates the token.
    async fn org_client(&self, org: &str) -> Result<Arc<Octocrab>, AssignError> {
        let token = self.tokens.token_for(org).await?;

        {
            let clients = self.clients.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(client) = clients.get(org) {
                if client.token == token {
                    return Ok(client.octocrab.clone());
                }
            }
        }

        debug!("Building a fresh API client for [{}].", org);
        let octocrab = Octocrab::builder()
            .personal_token(token.clone())
            .build()
            .map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Could not build an API client for [{}].", org),
                nested: nested!(e),
            })?;

        let octocrab = Arc::new(octocrab);
        self.clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                org.to_string(),
                OrgClient {
                    token,
                    octocrab: octocrab.clone(),
                },
            );

        Ok(octocrab)
    }

    /// GET `url` through `client` and map the JSON body into `T`.
    async fn get_json<T: DeserializeOwned>(
        client: &Octocrab, url: &str,
    ) -> Result<T, AssignError> {
        let builder = client
            .request_builder(url, reqwest::Method::GET)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");

        let response =
            client.execute(builder).await.map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Error fetching [{}].", url),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::GitHubAPIError {
                msg: format!("Request to [{}] was rejected.", url),
                nested: anyhow::anyhow!("HTTP status {}", response.status()),
            });
        }

        let raw_response_text =
            response.text().await.map_err(|e| AssignError::GitHubAPIResponseBodyError {
                msg: format!("Error retrieving body for [{}].", url),
                nested: nested!(e),
            })?;

        serde_json::from_str(&raw_response_text).map_err(|e| {
            trace!("Raw response = {}", raw_response_text);
            AssignError::JsonParseError {
                msg: format!("Error mapping JSON for [{}].", url),
                nested: nested!(e),
            }
        })
    }

    /// Walks a paged list endpoint (`per_page=100`) until a short page or the page cap.
    async fn get_paged<T: DeserializeOwned>(
        client: &Octocrab, base_url: &str,
    ) -> Result<Vec<T>, AssignError> {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let mut collected: Vec<T> = Vec::new();

        for page in 1..=MAX_LIST_PAGES {
            let url = format!("{}{}per_page=100&page={}", base_url, separator, page);
            let batch: Vec<T> = Self::get_json(client, &url).await?;
            let batch_len = batch.len();
            collected.extend(batch);

            if batch_len < 100 {
                return Ok(collected);
            }
        }

        warn!(
            "Stopped paging [{}] after [{}] pages; the remainder is ignored.",
            base_url, MAX_LIST_PAGES
        );
        Ok(collected)
    }

    /// The aggregated CI verdict for a head commit, folding the commit's combined status with
    /// its check runs.
    async fn test_state(
        client: &Octocrab, owner: &str, repo: &str, sha: &str,
    ) -> Result<TestState, AssignError> {
        let status_url = format!(
            "{}repos/{}/{}/commits/{}/status",
            client.base_url.as_str(),
            owner,
            repo,
            sha
        );
        let combined: CombinedStatus = Self::get_json(client, &status_url).await?;

        let checks_url = format!(
            "{}repos/{}/{}/commits/{}/check-runs",
            client.base_url.as_str(),
            owner,
            repo,
            sha
        );
        let check_runs: CheckRuns = Self::get_json(client, &checks_url).await?;

        let mut live_check: Option<&str> = None;
        let mut checks_failed = false;
        for run in &check_runs.check_runs {
            match run.status.as_str() {
                "in_progress" => live_check = Some("in_progress"),
                "queued" if live_check.is_none() => live_check = Some("queued"),
                _ => {}
            }
            if let Some(conclusion) = &run.conclusion {
                if conclusion == "failure" || conclusion == "timed_out" {
                    checks_failed = true;
                }
            }
        }

        // a failed check run is a failure even when the legacy status API says otherwise
        let combined_state =
            if checks_failed { "failure" } else { combined.state.as_str() };

        Ok(TestState::from_host(combined_state, live_check))
    }

    /// The timestamp of the head commit.
    async fn last_commit_at(
        client: &Octocrab, owner: &str, repo: &str, sha: &str,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, AssignError> {
        let url =
            format!("{}repos/{}/{}/commits/{}", client.base_url.as_str(), owner, repo, sha);
        let commit: CommitJson = Self::get_json(client, &url).await?;
        Ok(commit.timestamp())
    }

    /// The timestamp of the most recent submitted review, if any.
    async fn last_review_at(
        client: &Octocrab, locator: &PrLocator,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, AssignError> {
        let url = format!(
            "{}repos/{}/{}/pulls/{}/reviews",
            client.base_url.as_str(),
            locator.owner,
            locator.repo,
            locator.number
        );
        let reviews: Vec<ReviewJson> = Self::get_paged(client, &url).await?;

        Ok(reviews.into_iter().filter_map(|review| review.submitted_at).max())
    }
}

#[async_trait]
impl GitHubGateway for GitHubClient {
    async fn installations(&self) -> Result<Vec<Installation>, AssignError> {
        self.tokens.installations().await
    }

    async fn installation_token(&self, org: &str) -> Result<String, AssignError> {
        self.tokens.token_for(org).await
    }

    async fn pull_request(&self, locator: &PrLocator) -> Result<PullRequest, AssignError> {
        let client = self.org_client(&locator.owner).await?;
        let url = format!(
            "{}repos/{}/{}/pulls/{}",
            client.base_url.as_str(),
            locator.owner,
            locator.repo,
            locator.number
        );

        let raw: PullRequestJson =
            Self::get_json(&client, &url).await.map_err(|e| AssignError::PullRequestNotFound {
                repo_name: format!("{}/{}", locator.owner, locator.repo),
                pr_number: locator.number,
                nested: nested!(e),
            })?;

        // best-effort enrichment; an unreadable CI state or activity timestamp must not make the
        // whole PR unprocessable
        let test_state =
            Self::test_state(&client, &locator.owner, &locator.repo, &raw.head.sha)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not resolve CI state for [{}]: {}", locator, e);
                    TestState::Unknown
                });

        let last_commit_at =
            Self::last_commit_at(&client, &locator.owner, &locator.repo, &raw.head.sha)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not resolve head-commit time for [{}]: {}", locator, e);
                    None
                });

        let last_review_at = Self::last_review_at(&client, locator).await.unwrap_or_else(|e| {
            warn!("Could not resolve last-review time for [{}]: {}", locator, e);
            None
        });

        Ok(PullRequest {
            owner: locator.owner.clone(),
            repo: locator.repo.clone(),
            number: raw.number,
            author: raw.user.login,
            title: raw.title.unwrap_or_default(),
            state: PrState::parse(&raw.state, raw.merged_at.is_some()),
            draft: raw.draft,
            requested_reviewers: raw
                .requested_reviewers
                .into_iter()
                .map(|user| user.login)
                .collect(),
            assignees: raw.assignees.into_iter().map(|user| user.login).collect(),
            created_at: raw.created_at,
            updated_at: raw.updated_at.unwrap_or(raw.created_at),
            last_commit_at,
            last_review_at,
            test_state,
            changed_files: Vec::new(),
        })
    }

    async fn open_pull_requests(&self, org: &str) -> Result<Vec<PrLocator>, AssignError> {
        let client = self.org_client(org).await?;
        let mut locators: Vec<PrLocator> = Vec::new();

        for page in 1..=MAX_LIST_PAGES {
            let url = format!(
                "{}search/issues?q=org:{}+type:pr+state:open&per_page=100&page={}",
                client.base_url.as_str(),
                org,
                page
            );
            let results: SearchResults = Self::get_json(&client, &url).await?;
            let batch_len = results.items.len();

            for item in results.items {
                match item.owner_and_repo() {
                    Some((owner, repo)) => {
                        locators.push(PrLocator::new(&owner, &repo, item.number))
                    }
                    None => warn!(
                        "Skipping search result with unparseable repository URL [{}].",
                        item.repository_url
                    ),
                }
            }

            if batch_len < 100 {
                break;
            }
        }

        debug!("Found [{}] open PRs across [{}].", locators.len(), org);
        Ok(locators)
    }

    async fn changed_files(&self, locator: &PrLocator) -> Result<Vec<ChangedFile>, AssignError> {
        let client = self.org_client(&locator.owner).await?;
        let url = format!(
            "{}repos/{}/{}/pulls/{}/files",
            client.base_url.as_str(),
            locator.owner,
            locator.repo,
            locator.number
        );

        let files: Vec<ChangedFileJson> = Self::get_paged(&client, &url).await?;
        Ok(files.into_iter().map(|file| file.into_model()).collect())
    }

    async fn file_patch(
        &self, locator: &PrLocator, filename: &str,
    ) -> Result<String, AssignError> {
        let files = self.changed_files(locator).await?;

        Ok(files
            .into_iter()
            .find(|file| file.filename == filename)
            .map(|file| file.patch)
            .unwrap_or_default())
    }

    async fn collaborators(
        &self, owner: &str, repo: &str,
    ) -> Result<Vec<String>, AssignError> {
        let client = self.org_client(owner).await?;
        let url =
            format!("{}repos/{}/{}/collaborators", client.base_url.as_str(), owner, repo);

        let collaborators: Vec<Collaborator> = Self::get_paged(&client, &url).await?;

        Ok(collaborators
            .into_iter()
            .filter(|collaborator| collaborator.permissions.push)
            .map(|collaborator| collaborator.login)
            .collect())
    }

    async fn open_pr_count(&self, org: &str, username: &str) -> Result<u32, AssignError> {
        let client = self.org_client(org).await?;
        let url = format!(
            "{}search/issues?q=org:{}+author:{}+type:pr+state:open&per_page=1",
            client.base_url.as_str(),
            org,
            username
        );

        let results: SearchResults = Self::get_json(&client, &url).await?;
        Ok(results.total_count as u32)
    }

    async fn user_type(&self, org: &str, username: &str) -> Result<String, AssignError> {
        let client = self.org_client(org).await?;
        let url = format!("{}users/{}", client.base_url.as_str(), username);

        let user: User = Self::get_json(&client, &url).await?;
        Ok(user.user_type)
    }

    async fn add_reviewers(
        &self, locator: &PrLocator, reviewers: &[String],
    ) -> Result<(), AssignError> {
        let client = self.org_client(&locator.owner).await?;
        let url = format!(
            "{}repos/{}/{}/pulls/{}/requested_reviewers",
            client.base_url.as_str(),
            locator.owner,
            locator.repo,
            locator.number
        );

        let builder = client
            .request_builder(&url, reqwest::Method::POST)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&json!({ "reviewers": reviewers }));

        let response =
            client.execute(builder).await.map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Error requesting reviewers on [{}].", locator),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::GitHubAPIError {
                msg: format!("Reviewer request on [{}] was rejected.", locator),
                nested: anyhow::anyhow!("HTTP status {}", response.status()),
            });
        }

        Ok(())
    }

    async fn graph_query(
        &self, org: &str, query: &str, variables: Value,
    ) -> Result<Value, AssignError> {
        let token = self.tokens.token_for(org).await?;
        let payload = json!({ "query": query, "variables": variables });

        let response = self
            .http
            .post(GRAPHQL_URL)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Error executing GraphQL query under [{}].", org),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::GitHubAPIError {
                msg: format!("GraphQL query under [{}] was rejected.", org),
                nested: anyhow::anyhow!("HTTP status {}", response.status()),
            });
        }

        let body: Value = response.json().await.map_err(|e| AssignError::JsonParseError {
            msg: format!("Error mapping GraphQL response under [{}].", org),
            nested: nested!(e),
        })?;

        if let Some(errors) = body.get("errors").and_then(|errors| errors.as_array()) {
            if !errors.is_empty() {
                return Err(AssignError::GraphQLError(
                    serde_json::to_string(errors).unwrap_or_else(|_| "unprintable".to_string()),
                ));
            }
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}
