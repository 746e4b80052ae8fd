//! The eligibility gate every pull request must pass before the selector is consulted.
//!
//! A gate miss is not an error; it is the normal outcome for most PRs a sweep touches, and both
//! the push path and the sweep path rely on it for idempotence (a PR that already has requested
//! reviewers never reaches the assignment step again).

use chrono::{DateTime, Duration, Utc};
use strum_macros::Display;

use crate::model::{PullRequest, TestState};

/// Gate thresholds derived from process configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_age: Duration,
    pub max_age: Duration,
}

/// Why a pull request was skipped.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    #[strum(serialize = "draft")]
    Draft,
    #[strum(serialize = "reviewers-already-requested")]
    ReviewersAlreadyRequested,
    #[strum(serialize = "updated-too-recently")]
    UpdatedTooRecently,
    #[strum(serialize = "activity-too-recent")]
    ActivityTooRecent,
    #[strum(serialize = "dormant")]
    Dormant,
    #[strum(serialize = "failing-tests-grace")]
    FailingTestsGrace,
    #[strum(serialize = "pending-tests-grace")]
    PendingTestsGrace,
}

/// Outcome of the gate for one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    Skipped(SkipReason),
}

/// Evaluates all gate conditions against `now`. Pure; the caller supplies the clock.
pub fn evaluate(pr: &PullRequest, config: &GateConfig, now: DateTime<Utc>) -> GateDecision {
    if pr.draft {
        return GateDecision::Skipped(SkipReason::Draft);
    }

    if !pr.requested_reviewers.is_empty() {
        return GateDecision::Skipped(SkipReason::ReviewersAlreadyRequested);
    }

    // a two-minute buffer against races with in-flight pushes
    let since_update = now - pr.updated_at;
    if since_update < Duration::minutes(2) {
        return GateDecision::Skipped(SkipReason::UpdatedTooRecently);
    }

    let since_activity = now - pr.last_activity_at();
    if since_activity < config.min_age {
        return GateDecision::Skipped(SkipReason::ActivityTooRecent);
    }
    if since_activity > config.max_age {
        return GateDecision::Skipped(SkipReason::Dormant);
    }

    match pr.test_state {
        TestState::Failing if since_update < Duration::minutes(90) => {
            GateDecision::Skipped(SkipReason::FailingTestsGrace)
        }
        TestState::Pending | TestState::Queued | TestState::Running
            if since_update < Duration::minutes(20) =>
        {
            GateDecision::Skipped(SkipReason::PendingTestsGrace)
        }
        _ => GateDecision::Eligible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::model::PrState;

    fn base_pr(now: DateTime<Utc>) -> PullRequest {
        PullRequest {
            owner: "acme".to_string(),
            repo: "rockets".to_string(),
            number: 1,
            author: "wile".to_string(),
            title: "Add afterburner".to_string(),
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

    fn config() -> GateConfig {
        GateConfig {
            min_age: Duration::minutes(2),
            max_age: Duration::days(90),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.ymd(2021, 6, 1).and_hms(12, 0, 0)
    }

    #[test]
    fn a_quiet_passing_pr_is_eligible() {
        assert_eq!(evaluate(&base_pr(now()), &config(), now()), GateDecision::Eligible);
    }

    #[test]
    fn drafts_are_skipped() {
        let mut pr = base_pr(now());
        pr.draft = true;
        assert_eq!(
            evaluate(&pr, &config(), now()),
            GateDecision::Skipped(SkipReason::Draft)
        );
    }

    #[test]
    fn existing_reviewer_requests_short_circuit() {
        let mut pr = base_pr(now());
        pr.requested_reviewers = vec!["road".to_string()];
        assert_eq!(
            evaluate(&pr, &config(), now()),
            GateDecision::Skipped(SkipReason::ReviewersAlreadyRequested)
        );
    }

    #[test]
    fn fresh_updates_wait_out_the_push_race_buffer() {
        let mut pr = base_pr(now());
        pr.updated_at = now() - Duration::seconds(30);
        assert_eq!(
            evaluate(&pr, &config(), now()),
            GateDecision::Skipped(SkipReason::UpdatedTooRecently)
        );
    }

    #[test]
    fn dormant_prs_are_left_alone() {
        let mut pr = base_pr(now());
        pr.updated_at = now() - Duration::days(120);
        pr.last_commit_at = Some(now() - Duration::days(120));
        assert_eq!(
            evaluate(&pr, &config(), now()),
            GateDecision::Skipped(SkipReason::Dormant)
        );
    }

    #[test]
    fn failing_tests_get_a_ninety_minute_grace() {
        let mut pr = base_pr(now());
        pr.test_state = TestState::Failing;
        pr.updated_at = now() - Duration::minutes(30);
        pr.last_commit_at = Some(now() - Duration::minutes(30));
        assert_eq!(
            evaluate(&pr, &config(), now()),
            GateDecision::Skipped(SkipReason::FailingTestsGrace)
        );

        pr.updated_at = now() - Duration::minutes(91);
        pr.last_commit_at = Some(now() - Duration::minutes(91));
        assert_eq!(evaluate(&pr, &config(), now()), GateDecision::Eligible);
    }

    #[test]
    fn pending_tests_get_a_twenty_minute_grace() {
        for state in &[TestState::Pending, TestState::Queued, TestState::Running] {
            let mut pr = base_pr(now());
            pr.test_state = *state;
            pr.updated_at = now() - Duration::minutes(10);
            pr.last_commit_at = Some(now() - Duration::minutes(10));
            assert_eq!(
                evaluate(&pr, &config(), now()),
                GateDecision::Skipped(SkipReason::PendingTestsGrace)
            );

            pr.updated_at = now() - Duration::minutes(21);
            pr.last_commit_at = Some(now() - Duration::minutes(21));
            assert_eq!(evaluate(&pr, &config(), now()), GateDecision::Eligible);
        }
    }

    #[test]
    fn unknown_test_state_needs_no_extra_wait() {
        let mut pr = base_pr(now());
        pr.test_state = TestState::Unknown;
        assert_eq!(evaluate(&pr, &config(), now()), GateDecision::Eligible);
    }
}
