//! The weighted reviewer-ranking engine.
//!
//! `rank()` maps one pull request to an ordered list of at most five candidates using
//! code-history signals (file history, line blame, recent merges, directory activity) seeded by
//! explicit assignees, then applies hard filters (author, bots, write access) and a
//! workload-aware penalty. Results are stable for identical host responses; every expensive host
//! query is memoized in the shared TTL cache so concurrent evaluations of one repository reuse
//! each other's work.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Age, Utc};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use serde_json::json;
use time::Instant;

use crate::cache::TtlCache;
use crate::error::AssignError;
use crate::github::gateway::GitHubGateway;
use crate::locator::PrLocator;
use crate::model::{ChangedFile, HistoricalPullRequest, PullRequest};
use crate::selection::candidate::{Candidate, CandidateSet, SignalSource};
use crate::selection::history;
use crate::selection::history::{BlameRange, HistoryEntry};
use crate::selection::patch;

/// Upper bound on the returned ranking; callers generally assign the top two.
pub const MAX_CANDIDATES: usize = 5;

/// Score granted to small-team members, standing in for "all the context there is".
pub const MAX_CONTEXT_SCORE: u32 = 100;

/// Weight of an explicit assignee; dominates every organic signal.
const ASSIGNEE_WEIGHT: u32 = 200;

/// How many of the PR's files are analyzed, picked by churn.
const TOP_FILE_COUNT: usize = 3;

/// Historical PRs examined per file.
const FILE_HISTORY_LIMIT: u32 = 10;

/// Historical PRs examined per directory.
const DIRECTORY_HISTORY_LIMIT: u32 = 10;

/// Pages of 100 scanned for the recently-merged signal.
const RECENT_MERGED_PAGES: usize = 2;

const RECENT_MERGER_WEIGHT: u32 = 50;
const RECENT_REVIEWER_WEIGHT: u32 = 25;
const DIR_AUTHOR_WEIGHT: u32 = 30;
const DIR_REVIEWER_WEIGHT: u32 = 15;

/// Non-overlapping blame ranges still count as file contributions when merged within this window.
const CONTRIBUTOR_RECENCY_DAYS: i64 = 365;

/// Machine-generated manifests whose line attribution says nothing about reviewers.
const LOCK_FILES: [&str; 5] =
    ["go.sum", "package-lock.json", "yarn.lock", "Gemfile.lock", "Cargo.lock"];

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);
const SIX_HOURS: Duration = Duration::from_secs(6 * 60 * 60);

/// The slice of process configuration the selector consumes.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub pr_count_ttl: Duration,
    pub max_reviewer_load: Option<u32>,
    pub bot_logins: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            pr_count_ttl: SIX_HOURS,
            max_reviewer_load: None,
            bot_logins: Vec::new(),
        }
    }
}

pub struct Selector {
    gateway: Arc<dyn GitHubGateway>,
    cache: Arc<TtlCache>,
    config: SelectorConfig,
}

impl Selector {
    pub fn new(
        gateway: Arc<dyn GitHubGateway>, cache: Arc<TtlCache>, config: SelectorConfig,
    ) -> Self {
        Selector {
            gateway,
            cache,
            config,
        }
    }

    /// Ranks candidate reviewers for `pr`. Returns an empty list when no valid candidate exists;
    /// never returns the PR author.
    pub async fn rank(&self, pr: &PullRequest) -> Result<Vec<Candidate>, AssignError> {
        let start = Instant::now();
        let locator = pr.locator();
        debug!("Ranking reviewer candidates for [{}]...", locator);

        // the one step whose failure is fatal: without the collaborator set there is no telling
        // who may review at all
        let collaborators = self.collaborators_cached(&pr.owner, &pr.repo).await?;

        if let Some(small_team) = self.small_team(pr, &collaborators).await {
            info!(
                "[{}] is a small-team repository; selection shortcut applies ([{}] candidates).",
                locator,
                small_team.len()
            );
            return Ok(small_team);
        }

        let mut set = CandidateSet::new(&pr.author);

        // assignees are an explicit intent expression and outweigh everything organic
        for assignee in pr.assignees.iter().filter(|assignee| **assignee != pr.author) {
            set.credit(assignee, SignalSource::Assignee, ASSIGNEE_WEIGHT);
        }

        let files = self.current_files(pr).await;
        let top_files = Self::top_files(&files, set.is_empty());

        if top_files.is_empty() {
            if set.is_empty() {
                debug!("[{}] has no analyzable files and no assignees; nothing to rank.", locator);
                return Ok(Vec::new());
            }
            debug!("[{}] has no analyzable files; ranking assignees only.", locator);
        } else {
            // every signal is best-effort: a failed step contributes nothing and ranking goes on
            if let Err(e) = self.collect_file_history(pr, &top_files, &mut set).await {
                warn!("Skipping file-history signals for [{}]: {}", locator, e);
            }
            if let Err(e) = self.collect_blame(pr, &top_files, &mut set).await {
                warn!("Skipping blame signals for [{}]: {}", locator, e);
            }
            if let Err(e) = self.collect_recent_merged(pr, &mut set).await {
                warn!("Skipping recent-merge signals for [{}]: {}", locator, e);
            }
            if let Err(e) = self.collect_directory_signals(pr, &top_files, &mut set).await {
                warn!("Skipping directory signals for [{}]: {}", locator, e);
            }
        }

        let ranked = self.filter_and_rank(pr, set, &collaborators).await;

        debug!(
            "Ranked [{}] candidates for [{}] in {:?}.",
            ranked.len(),
            locator,
            start.elapsed()
        );
        Ok(ranked)
    }

    /// The small-team short-circuit: with two or fewer valid collaborators, scoring is
    /// meaningless and everyone eligible is returned outright. The verdict is cached for six
    /// hours per repository.
    async fn small_team(
        &self, pr: &PullRequest, collaborators: &[String],
    ) -> Option<Vec<Candidate>> {
        let key = format!("small-team:{}/{}", pr.owner, pr.repo);

        let roster: Option<Vec<String>> = match self.cache.get::<Option<Vec<String>>>(&key) {
            Some(cached) => (*cached).clone(),
            None => {
                let mut valid: Vec<String> = Vec::new();
                for login in collaborators {
                    if self.is_bot(&pr.owner, login).await {
                        continue;
                    }
                    valid.push(login.clone());
                }
                valid.sort();

                // the roster is cached author-agnostically (the author is re-excluded per PR
                // below), so "small" here means small enough that excluding one author could
                // still leave two or fewer eligible members
                let computed = if valid.len() <= 3 { Some(valid) } else { None };
                self.cache.set_with_ttl(&key, computed.clone(), SIX_HOURS);
                computed
            }
        };

        let roster = roster?;
        let eligible: Vec<&String> =
            roster.iter().filter(|login| **login != pr.author).collect();

        if eligible.len() > 2 {
            return None;
        }

        Some(
            eligible
                .into_iter()
                .map(|login| {
                    let mut candidate = Candidate::new(login);
                    candidate.credit(SignalSource::SmallTeam, MAX_CONTEXT_SCORE);
                    candidate
                })
                .collect(),
        )
    }

    /// The PR's changed files, from the PR record when pre-populated or from the host otherwise.
    async fn current_files(&self, pr: &PullRequest) -> Vec<ChangedFile> {
        if !pr.changed_files.is_empty() {
            return pr.changed_files.clone();
        }

        match self.changed_files_cached(&pr.locator()).await {
            Ok(files) => (*files).clone(),
            Err(e) => {
                warn!("Could not list changed files for [{}]: {}", pr.locator(), e);
                Vec::new()
            }
        }
    }

    /// Picks the most influential files by churn, excluding lock files. When the exclusion
    /// leaves nothing and there are no assignees to fall back on, all files are considered.
    fn top_files(files: &[ChangedFile], no_assignees: bool) -> Vec<ChangedFile> {
        let mut interesting: Vec<&ChangedFile> = files
            .iter()
            .filter(|file| {
                let basename = file.filename.rsplit('/').next().unwrap_or(&file.filename);
                !LOCK_FILES.contains(&basename)
            })
            .collect();

        if interesting.is_empty() && no_assignees {
            interesting = files.iter().collect();
        }

        interesting.sort_by(|a, b| {
            b.churn().cmp(&a.churn()).then_with(|| a.filename.cmp(&b.filename))
        });

        interesting.into_iter().take(TOP_FILE_COUNT).cloned().collect()
    }

    /// Signal 1: authors, mergers and approvers of the recent PRs that touched each top file,
    /// weighted by the added lines each of those PRs contributed to the file.
    async fn collect_file_history(
        &self, pr: &PullRequest, top_files: &[ChangedFile], set: &mut CandidateSet,
    ) -> Result<(), AssignError> {
        for file in top_files {
            let entries = self.file_history_cached(&pr.owner, &pr.repo, &file.filename).await?;

            for entry in entries.iter() {
                let pull = match &entry.pull {
                    Some(pull) => pull,
                    None => continue,
                };

                let patch = match self
                    .historical_patch(&pr.owner, &pr.repo, pull.number, &file.filename)
                    .await
                {
                    Ok(patch) => patch,
                    Err(e) => {
                        trace!(
                            "No usable patch for historical PR#[{}] on [{}]: {}",
                            pull.number,
                            file.filename,
                            e
                        );
                        continue;
                    }
                };

                let lines = patch::added_line_count(&patch);
                if lines == 0 {
                    continue;
                }

                Self::credit_file_contribution(set, pull, lines, true);
            }
        }

        Ok(())
    }

    /// Signal 2: blame-range overlap between the PR's changed lines and the default branch's
    /// current attribution.
    async fn collect_blame(
        &self, pr: &PullRequest, top_files: &[ChangedFile], set: &mut CandidateSet,
    ) -> Result<(), AssignError> {
        let recency_floor = Utc::now() - Age::days(CONTRIBUTOR_RECENCY_DAYS);

        for file in top_files {
            let hunks = patch::changed_ranges(&file.patch);
            let blame = self.blame_cached(&pr.owner, &pr.repo, &file.filename).await?;

            for range in blame.iter() {
                let overlap = patch::total_overlap(&range.range, &hunks);

                if overlap > 0 {
                    Self::credit_line_overlap(set, range, overlap);
                    continue;
                }

                // untouched but recently-merged ranges still mark the file's active custodians
                if let Some(pull) = &range.pull {
                    let recent = pull
                        .merged_at
                        .map(|merged_at| merged_at > recency_floor)
                        .unwrap_or(false);

                    if recent {
                        Self::credit_file_contribution(set, pull, range.range.len(), false);
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal 3: whoever merges and approves across the repository lately.
    async fn collect_recent_merged(
        &self, pr: &PullRequest, set: &mut CandidateSet,
    ) -> Result<(), AssignError> {
        let recent = self.recent_merged_cached(&pr.owner, &pr.repo).await?;

        for pull in recent.iter() {
            set.credit(&pull.merger, SignalSource::RecentMerger, RECENT_MERGER_WEIGHT);
            for approver in &pull.approvers {
                set.credit(approver, SignalSource::RecentReviewer, RECENT_REVIEWER_WEIGHT);
            }
        }

        Ok(())
    }

    /// Signal 4: recent activity in the directories the top files live in.
    async fn collect_directory_signals(
        &self, pr: &PullRequest, top_files: &[ChangedFile], set: &mut CandidateSet,
    ) -> Result<(), AssignError> {
        let directories: Vec<String> = top_files
            .iter()
            .filter_map(|file| {
                file.filename.rsplit_once('/').map(|(directory, _)| directory.to_string())
            })
            .unique()
            .collect();

        for directory in directories {
            let entries =
                self.directory_history_cached(&pr.owner, &pr.repo, &directory).await?;

            for entry in entries.iter() {
                match &entry.pull {
                    Some(pull) => {
                        set.credit(&pull.author, SignalSource::DirAuthor, DIR_AUTHOR_WEIGHT);
                        for approver in &pull.approvers {
                            set.credit(
                                approver,
                                SignalSource::DirReviewer,
                                DIR_REVIEWER_WEIGHT,
                            );
                        }
                    }
                    // direct pushes still say who works here
                    None => set.credit(
                        &entry.commit_author,
                        SignalSource::DirAuthor,
                        DIR_AUTHOR_WEIGHT,
                    ),
                }
            }
        }

        Ok(())
    }

    fn credit_file_contribution(
        set: &mut CandidateSet, pull: &HistoricalPullRequest, lines: u32, doubled_merger: bool,
    ) {
        set.credit(&pull.author, SignalSource::FileAuthor, lines);

        // mergers are a stronger activity signal than authors on the direct file-history path
        let merger_lines = if doubled_merger { lines * 2 } else { lines };
        set.credit(&pull.merger, SignalSource::FileMerger, merger_lines);

        for approver in &pull.approvers {
            set.credit(approver, SignalSource::FileReviewer, lines);
        }
    }

    fn credit_line_overlap(set: &mut CandidateSet, range: &BlameRange, overlap: u32) {
        match &range.pull {
            Some(pull) => {
                set.credit(&pull.author, SignalSource::LineAuthor, overlap);
                for approver in &pull.approvers {
                    set.credit(approver, SignalSource::LineReviewer, overlap);
                }
                set.credit(
                    &pull.merger,
                    SignalSource::LineMerger,
                    std::cmp::max(1, overlap * 3 / 10),
                );
            }
            None => set.credit(&range.commit_author, SignalSource::LineAuthor, overlap),
        }
    }

    /// Hard filters plus the workload penalty, then the final ordering.
    async fn filter_and_rank(
        &self, pr: &PullRequest, set: CandidateSet, collaborators: &[String],
    ) -> Vec<Candidate> {
        let writers: HashSet<&str> = collaborators.iter().map(String::as_str).collect();
        let mut survivors: Vec<Candidate> = Vec::new();

        for mut candidate in set.into_candidates() {
            if candidate.username() == pr.author {
                continue;
            }
            if !writers.contains(candidate.username()) {
                trace!(
                    "Dropping [{}] for [{}]: no write access.",
                    candidate.username(),
                    pr.locator()
                );
                continue;
            }
            if self.is_bot(&pr.owner, candidate.username()).await {
                debug!("Dropping [{}] for [{}]: bot account.", candidate.username(), pr.locator());
                continue;
            }

            let open_prs = match self.open_pr_count_cached(&pr.owner, candidate.username()).await
            {
                Ok(count) => count,
                Err(e) => {
                    warn!(
                        "Could not count open PRs for [{}]; applying no workload penalty. {}",
                        candidate.username(),
                        e
                    );
                    0
                }
            };

            if let Some(load_ceiling) = self.config.max_reviewer_load {
                if open_prs > load_ceiling {
                    debug!(
                        "Dropping [{}] for [{}]: [{}] open PRs exceeds the configured ceiling of [{}].",
                        candidate.username(),
                        pr.locator(),
                        open_prs,
                        load_ceiling
                    );
                    continue;
                }
            }

            candidate.apply_workload_penalty(open_prs);
            survivors.push(candidate);
        }

        survivors.sort_by(|a, b| {
            b.final_score()
                .cmp(&a.final_score())
                .then_with(|| a.username().cmp(b.username()))
        });
        survivors.truncate(MAX_CANDIDATES);

        survivors
    }

    /// Whether `login` is a bot: by name heuristics, by the configured list, or by the
    /// host-reported account type (cached for a day).
    async fn is_bot(&self, org: &str, login: &str) -> bool {
        let lowered = login.to_ascii_lowercase();
        if lowered.ends_with("[bot]") || lowered.contains("bot") {
            return true;
        }
        if self.config.bot_logins.iter().any(|listed| listed.eq_ignore_ascii_case(login)) {
            return true;
        }

        match self.user_type_cached(org, login).await {
            Ok(user_type) => user_type == "Bot",
            Err(e) => {
                warn!("Could not resolve account type for [{}]; assuming human. {}", login, e);
                false
            }
        }
    }

    // cached host queries ---

    async fn collaborators_cached(
        &self, owner: &str, repo: &str,
    ) -> Result<Arc<Vec<String>>, AssignError> {
        let key = format!("collaborators:{}/{}", owner, repo);
        if let Some(hit) = self.cache.get::<Vec<String>>(&key) {
            return Ok(hit);
        }

        let fresh = self.gateway.collaborators(owner, repo).await?;
        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(Arc::new(fresh))
    }

    async fn changed_files_cached(
        &self, locator: &PrLocator,
    ) -> Result<Arc<Vec<ChangedFile>>, AssignError> {
        let key = format!("pr-files:{}/{}/{}", locator.owner, locator.repo, locator.number);
        if let Some(hit) = self.cache.get::<Vec<ChangedFile>>(&key) {
            return Ok(hit);
        }

        let fresh = self.gateway.changed_files(locator).await?;
        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(Arc::new(fresh))
    }

    /// The patch a historical PR applied to one file, via the (cached) file listing of that PR.
    async fn historical_patch(
        &self, owner: &str, repo: &str, number: u64, filename: &str,
    ) -> Result<String, AssignError> {
        let files =
            self.changed_files_cached(&PrLocator::new(owner, repo, number)).await?;

        Ok(files
            .iter()
            .find(|file| file.filename == filename)
            .map(|file| file.patch.clone())
            .unwrap_or_default())
    }

    async fn blame_cached(
        &self, owner: &str, repo: &str, path: &str,
    ) -> Result<Arc<Vec<BlameRange>>, AssignError> {
        let key = format!("blame:{}/{}/{}", owner, repo, path);
        if let Some(hit) = self.cache.get::<Vec<BlameRange>>(&key) {
            return Ok(hit);
        }

        let variables = json!({ "owner": owner, "name": repo, "path": path });
        let data = self.gateway.graph_query(owner, history::BLAME_QUERY, variables).await?;
        let fresh = history::parse_blame(&data);

        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(Arc::new(fresh))
    }

    async fn file_history_cached(
        &self, owner: &str, repo: &str, path: &str,
    ) -> Result<Arc<Vec<HistoryEntry>>, AssignError> {
        let key = format!("file-history:{}/{}:{}", owner, repo, path);
        if let Some(hit) = self.cache.get::<Vec<HistoryEntry>>(&key) {
            return Ok(hit);
        }

        let variables =
            json!({ "owner": owner, "name": repo, "path": path, "limit": FILE_HISTORY_LIMIT });
        let data =
            self.gateway.graph_query(owner, history::FILE_HISTORY_QUERY, variables).await?;
        let fresh = history::parse_file_history(&data);

        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(Arc::new(fresh))
    }

    async fn directory_history_cached(
        &self, owner: &str, repo: &str, directory: &str,
    ) -> Result<Arc<Vec<HistoryEntry>>, AssignError> {
        let key = format!("commits-dir:{}/{}:{}", owner, repo, directory);
        if let Some(hit) = self.cache.get::<Vec<HistoryEntry>>(&key) {
            return Ok(hit);
        }

        let variables = json!({
            "owner": owner,
            "name": repo,
            "path": directory,
            "limit": DIRECTORY_HISTORY_LIMIT
        });
        let data =
            self.gateway.graph_query(owner, history::FILE_HISTORY_QUERY, variables).await?;
        let fresh = history::parse_file_history(&data);

        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(Arc::new(fresh))
    }

    async fn recent_merged_cached(
        &self, owner: &str, repo: &str,
    ) -> Result<Arc<Vec<HistoricalPullRequest>>, AssignError> {
        let key = format!("prs-project:{}/{}", owner, repo);
        if let Some(hit) = self.cache.get::<Vec<HistoricalPullRequest>>(&key) {
            return Ok(hit);
        }

        let mut pulls: Vec<HistoricalPullRequest> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..RECENT_MERGED_PAGES {
            let variables = json!({ "owner": owner, "name": repo, "cursor": cursor });
            let data =
                self.gateway.graph_query(owner, history::RECENT_MERGED_QUERY, variables).await?;

            let (batch, next_cursor) = history::parse_recent_merged(&data);
            pulls.extend(batch);

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.cache.set_with_ttl(&key, pulls.clone(), ONE_DAY);
        Ok(Arc::new(pulls))
    }

    async fn open_pr_count_cached(
        &self, org: &str, username: &str,
    ) -> Result<u32, AssignError> {
        let key = format!("open-pr-count:{}:{}", org, username);
        if let Some(hit) = self.cache.get::<u32>(&key) {
            return Ok(*hit);
        }

        let fresh = self.gateway.open_pr_count(org, username).await?;
        self.cache.set_with_ttl(&key, fresh, self.config.pr_count_ttl);
        Ok(fresh)
    }

    async fn user_type_cached(&self, org: &str, login: &str) -> Result<String, AssignError> {
        let key = format!("user-type:{}", login);
        if let Some(hit) = self.cache.get::<String>(&key) {
            return Ok((*hit).clone());
        }

        let fresh = self.gateway.user_type(org, login).await?;
        self.cache.set_with_ttl(&key, fresh.clone(), ONE_DAY);
        Ok(fresh)
    }
}
