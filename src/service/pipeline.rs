//! The single-PR pipeline: fetch, gate, rank, assign. Both the push path and the sweep path end
//! up here, as does the single-shot CLI; idempotence comes from the gate (a PR that already has
//! requested reviewers is skipped before any write).

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use time::Instant;

use crate::error::AssignError;
use crate::gate;
use crate::gate::{GateConfig, GateDecision, SkipReason};
use crate::github::gateway::GitHubGateway;
use crate::locator::PrLocator;
use crate::selection::selector::Selector;
use crate::service::metrics::Metrics;

/// How many of the ranked candidates actually get a review request.
pub const REVIEWERS_PER_PR: usize = 2;

/// What the pipeline did with one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reviewers were requested.
    Assigned(Vec<String>),
    /// Dry-run mode: these reviewers would have been requested.
    WouldAssign(Vec<String>),
    /// The gate turned the PR away.
    Skipped(SkipReason),
    /// The gate passed but no valid candidate exists.
    NoCandidates,
}

pub struct Pipeline {
    gateway: Arc<dyn GitHubGateway>,
    selector: Selector,
    gate_config: GateConfig,
    metrics: Arc<Metrics>,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn GitHubGateway>, selector: Selector, gate_config: GateConfig,
        metrics: Arc<Metrics>, dry_run: bool,
    ) -> Self {
        Pipeline {
            gateway,
            selector,
            gate_config,
            metrics,
            dry_run,
        }
    }

    /// Runs one pull request through the whole pipeline.
    pub async fn process(&self, locator: &PrLocator) -> Result<Outcome, AssignError> {
        let start = Instant::now();

        let pr = self.gateway.pull_request(locator).await?;
        self.metrics.record_pr_seen(&locator.to_string());

        if let GateDecision::Skipped(reason) = gate::evaluate(&pr, &self.gate_config, Utc::now())
        {
            debug!("Skipping [{}]: {}.", locator, reason);
            return Ok(Outcome::Skipped(reason));
        }

        let ranked = self.selector.rank(&pr).await?;
        if ranked.is_empty() {
            info!("No valid reviewer candidates for [{}]; leaving it untouched.", locator);
            return Ok(Outcome::NoCandidates);
        }

        let picks: Vec<String> = ranked
            .iter()
            .take(REVIEWERS_PER_PR)
            .map(|candidate| candidate.username().to_string())
            .collect();

        if self.dry_run {
            info!(
                "[dry-run] Would request reviews on [{}] from [{}]. Took {:?}.",
                locator,
                picks.join(", "),
                start.elapsed()
            );
            return Ok(Outcome::WouldAssign(picks));
        }

        self.gateway.add_reviewers(locator, &picks).await?;
        self.metrics.record_pr_modified(&locator.to_string());

        info!(
            "Requested reviews on [{}] from [{}]. Took {:?}.",
            locator,
            picks.join(", "),
            start.elapsed()
        );
        Ok(Outcome::Assigned(picks))
    }
}
