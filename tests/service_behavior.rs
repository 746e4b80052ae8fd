//! Behavior of the service plumbing around the selector: pipeline idempotence and write
//! discipline, and the monitor's event validation, deduplication and queue bounds.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use prefect::cache::TtlCache;
use prefect::gate::{GateConfig, SkipReason};
use prefect::github::events::{EventConnector, EventKind, PushEvent};
use prefect::github::gateway::GitHubGateway;
use prefect::selection::selector::{Selector, SelectorConfig};
use prefect::service::metrics::Metrics;
use prefect::service::monitor::{MonitorConfig, OrgMonitor};
use prefect::service::pipeline::{Outcome, Pipeline};

/// awaits an async function, for easier usage in sync tests. Requires the `tokio_test` dependency.
macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

fn gate_config() -> GateConfig {
    GateConfig {
        min_age: chrono::Duration::minutes(2),
        max_age: chrono::Duration::days(90),
    }
}

fn pipeline_over(host: &Arc<StubHost>, metrics: &Arc<Metrics>, dry_run: bool) -> Arc<Pipeline> {
    let gateway: Arc<dyn GitHubGateway> = host.clone();
    let selector =
        Selector::new(gateway.clone(), Arc::new(TtlCache::default()), SelectorConfig::default());

    Arc::new(Pipeline::new(gateway, selector, gate_config(), metrics.clone(), dry_run))
}

fn monitor_over(host: &Arc<StubHost>, config: MonitorConfig) -> Arc<OrgMonitor> {
    let gateway: Arc<dyn GitHubGateway> = host.clone();
    let connector: Arc<dyn EventConnector> = Arc::new(NullConnector);
    let metrics = Arc::new(Metrics::default());
    let pipeline = pipeline_over(host, &metrics, false);

    OrgMonitor::new("acme", gateway, connector, pipeline, config)
}

fn pull_request_event(url: &str) -> PushEvent {
    PushEvent {
        kind: EventKind::PullRequest,
        url: url.to_string(),
    }
}

#[test]
fn the_pipeline_assigns_the_top_two_candidates() {
    let host = Arc::new(StubHost::new());
    host.seed_collaborators("acme", "rockets", &["wile", "u1", "u2", "x1", "x2"]);

    let mut pr = base_pr("acme", "rockets", 42, "wile");
    pr.changed_files = vec![changed_file("src/lib.rs", 10, 2, "@@ -1,10 +1,10 @@\n")];
    host.seed_pr(pr);

    *host.recent_pages.lock().unwrap() = vec![merged_page(
        vec![
            pull_node(900, "x1", "u1", &["u2"]),
            pull_node(901, "x1", "u1", &["u2"]),
            pull_node(902, "x1", "u1", &[]),
        ],
        None,
    )];

    let metrics = Arc::new(Metrics::default());
    let pipeline = pipeline_over(&host, &metrics, false);

    let outcome = aw!(pipeline.process(&"acme/rockets#42".parse().unwrap())).unwrap();
    assert_eq!(
        outcome,
        Outcome::Assigned(vec!["u1".to_string(), "u2".to_string()])
    );

    let assignments = host.assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].0, "acme/rockets#42");
    assert_eq!(assignments[0].1, vec!["u1".to_string(), "u2".to_string()]);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.prs_seen, 1);
    assert_eq!(snapshot.prs_modified, 1);
}

/// A PR that already has requested reviewers triggers zero writes, which is what makes the push
/// path and the sweep path safe to race each other.
#[test]
fn prs_with_reviewers_already_requested_cause_no_writes() {
    let host = Arc::new(StubHost::new());
    host.seed_collaborators("acme", "rockets", &["wile", "u1", "u2", "x1", "x2"]);

    let mut pr = base_pr("acme", "rockets", 43, "wile");
    pr.requested_reviewers = vec!["u2".to_string()];
    host.seed_pr(pr);

    let metrics = Arc::new(Metrics::default());
    let pipeline = pipeline_over(&host, &metrics, false);

    let outcome = aw!(pipeline.process(&"acme/rockets#43".parse().unwrap())).unwrap();
    assert_eq!(outcome, Outcome::Skipped(SkipReason::ReviewersAlreadyRequested));

    assert!(host.assignments().is_empty());
    assert_eq!(metrics.snapshot().prs_modified, 0);
}

#[test]
fn dry_run_reports_picks_but_never_writes() {
    let host = Arc::new(StubHost::new());
    host.seed_collaborators("acme", "rockets", &["wile", "u1", "u2", "x1", "x2"]);

    let mut pr = base_pr("acme", "rockets", 44, "wile");
    pr.changed_files = vec![changed_file("src/lib.rs", 4, 0, "@@ -1,4 +1,4 @@\n")];
    host.seed_pr(pr);

    *host.recent_pages.lock().unwrap() =
        vec![merged_page(vec![pull_node(900, "x1", "u1", &[])], None)];

    let metrics = Arc::new(Metrics::default());
    let pipeline = pipeline_over(&host, &metrics, true);

    let outcome = aw!(pipeline.process(&"acme/rockets#44".parse().unwrap())).unwrap();
    assert_eq!(outcome, Outcome::WouldAssign(vec!["u1".to_string()]));
    assert!(host.assignments().is_empty());
}

#[test]
fn a_pr_with_no_valid_candidates_is_left_untouched() {
    let host = Arc::new(StubHost::new());
    host.seed_collaborators("acme", "rockets", &["wile"]);
    host.seed_pr(base_pr("acme", "rockets", 45, "wile"));

    let metrics = Arc::new(Metrics::default());
    let pipeline = pipeline_over(&host, &metrics, false);

    let outcome = aw!(pipeline.process(&"acme/rockets#45".parse().unwrap())).unwrap();
    assert_eq!(outcome, Outcome::NoCandidates);
    assert!(host.assignments().is_empty());
}

/// Law: two events for the same URL within the dedup window collapse into one enqueue.
#[test]
fn duplicate_events_within_the_window_collapse() {
    let host = Arc::new(StubHost::new());
    let monitor = monitor_over(&host, MonitorConfig::default());

    let url = "https://github.com/acme/rockets/pull/42";
    assert!(monitor.handle_event(pull_request_event(url)));
    assert!(!monitor.handle_event(pull_request_event(url)));

    // a different PR is unaffected
    assert!(monitor.handle_event(pull_request_event("https://github.com/acme/rockets/pull/43")));
}

#[test]
fn non_pull_request_events_are_ignored() {
    let host = Arc::new(StubHost::new());
    let monitor = monitor_over(&host, MonitorConfig::default());

    let event = PushEvent {
        kind: EventKind::Other("issue_comment".to_string()),
        url: "https://github.com/acme/rockets/pull/42".to_string(),
    };
    assert!(!monitor.handle_event(event));
}

/// Events for other organizations are dropped; this covers the teardown race after an
/// installation removal.
#[test]
fn foreign_org_events_are_dropped() {
    let host = Arc::new(StubHost::new());
    let monitor = monitor_over(&host, MonitorConfig::default());

    assert!(!monitor.handle_event(pull_request_event("https://github.com/intruder/repo/pull/1")));
}

#[test]
fn unparseable_event_urls_are_dropped() {
    let host = Arc::new(StubHost::new());
    let monitor = monitor_over(&host, MonitorConfig::default());

    assert!(!monitor.handle_event(pull_request_event("not-a-pull-request-url")));
}

#[test]
fn a_full_queue_drops_the_event() {
    let host = Arc::new(StubHost::new());
    let config = MonitorConfig {
        queue_capacity: 2,
        ..MonitorConfig::default()
    };
    let monitor = monitor_over(&host, config);

    assert!(monitor.handle_event(pull_request_event("https://github.com/acme/r/pull/1")));
    assert!(monitor.handle_event(pull_request_event("https://github.com/acme/r/pull/2")));
    assert!(!monitor.handle_event(pull_request_event("https://github.com/acme/r/pull/3")));
}

#[test]
fn an_oversized_dedup_map_culls_old_entries() {
    let host = Arc::new(StubHost::new());
    let config = MonitorConfig {
        dedup_max_entries: 5,
        dedup_cull_age: Duration::from_secs(0),
        queue_capacity: 100,
        ..MonitorConfig::default()
    };
    let monitor = monitor_over(&host, config);

    for number in 1..=8u64 {
        monitor.handle_event(pull_request_event(&format!(
            "https://github.com/acme/r/pull/{}",
            number
        )));
    }

    assert!(
        monitor.dedup_entries() <= 5,
        "dedup map held {} entries",
        monitor.dedup_entries()
    );
}

#[test]
fn stopping_a_monitor_is_idempotent() {
    let host = Arc::new(StubHost::new());
    let monitor = monitor_over(&host, MonitorConfig::default());

    monitor.stop();
    monitor.stop();
    assert!(!monitor.is_running());
}

/// The health metrics drive staleness: finishing a run now renders ok.
#[test]
fn finished_runs_keep_the_service_healthy() {
    let metrics = Metrics::default();
    assert!(metrics.try_begin_run());
    metrics.finish_run(Utc::now());

    let (code, body) =
        prefect::service::http::render_health(&metrics.snapshot(), Utc::now());
    assert_eq!(code, 200);
    assert!(body.starts_with("ok "));
}
