//! The top-level loop: installation discovery, monitor reconciliation, periodic full sweeps,
//! and cooperative shutdown.
//!
//! Failure isolation is strict: a PR failing never aborts its organization's sweep, an
//! organization failing never aborts the cycle, and a monitor failing never affects its
//! siblings.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use time::Instant;
use tokio::sync::{mpsc, watch};

use crate::github::events::EventConnector;
use crate::github::gateway::GitHubGateway;
use crate::model::Installation;
use crate::service::metrics::Metrics;
use crate::service::monitor::{MonitorConfig, OrgMonitor};
use crate::service::pipeline::Pipeline;

pub struct Scheduler {
    gateway: Arc<dyn GitHubGateway>,
    connector: Arc<dyn EventConnector>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<Metrics>,
    loop_delay: Duration,
    monitor_config: MonitorConfig,
    monitors: Mutex<HashMap<String, Arc<OrgMonitor>>>,
}

impl Scheduler {
    pub fn new(
        gateway: Arc<dyn GitHubGateway>, connector: Arc<dyn EventConnector>,
        pipeline: Arc<Pipeline>, metrics: Arc<Metrics>, loop_delay: Duration,
        monitor_config: MonitorConfig,
    ) -> Self {
        Scheduler {
            gateway,
            connector,
            pipeline,
            metrics,
            loop_delay,
            monitor_config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Runs until `shutdown` fires: an immediate cycle, then one per `loop_delay` or manual
    /// trigger, whichever comes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, mut manual: mpsc::Receiver<()>) {
        info!("Scheduler started (sweep every {:?}).", self.loop_delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.loop_delay) => {}
                triggered = manual.recv() => {
                    if triggered.is_some() {
                        info!("Out-of-band sweep requested.");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.stop_all_monitors();
        info!("Scheduler stopped.");
    }

    /// One full cycle: discover installations, reconcile monitors, sweep every organization.
    async fn cycle(&self) {
        let installations = match self.gateway.installations().await {
            Ok(installations) => installations,
            Err(e) => {
                error!("Could not list installations; skipping this cycle. {}", e);
                return;
            }
        };

        self.reconcile_monitors(&installations);

        if !self.metrics.try_begin_run() {
            warn!("A sweep is already in flight; skipping this cycle.");
            return;
        }

        let start = Instant::now();
        for installation in &installations {
            self.metrics.record_org(&installation.org);
            self.sweep_org(&installation.org).await;
        }
        self.metrics.finish_run(Utc::now());

        info!(
            "Swept [{}] organizations in {:?}.",
            installations.len(),
            start.elapsed()
        );
    }

    /// Sweeps one organization sequentially; the push path may process the same PRs
    /// concurrently, which is safe because the gate makes assignment idempotent.
    async fn sweep_org(&self, org: &str) {
        let locators = match self.gateway.open_pull_requests(org).await {
            Ok(locators) => locators,
            Err(e) => {
                error!("Could not list open PRs for [{}]; skipping it this cycle. {}", org, e);
                return;
            }
        };

        debug!("Sweeping [{}] open PRs in [{}].", locators.len(), org);

        for locator in locators {
            if let Err(e) = self.pipeline.process(&locator).await {
                error!("Could not process [{}]: {}", locator, e);
            }
        }
    }

    /// Starts monitors for newly-installed organizations and stops those whose installation is
    /// gone.
    fn reconcile_monitors(&self, installations: &[Installation]) {
        let current: HashSet<&str> =
            installations.iter().map(|installation| installation.org.as_str()).collect();

        let mut monitors = self.monitors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let stale: Vec<String> = monitors
            .keys()
            .filter(|org| !current.contains(org.as_str()))
            .cloned()
            .collect();
        for org in stale {
            if let Some(monitor) = monitors.remove(&org) {
                info!("Installation for [{}] is gone; tearing its monitor down.", org);
                monitor.stop();
            }
        }

        for installation in installations {
            if monitors.contains_key(&installation.org) {
                continue;
            }

            let monitor = OrgMonitor::new(
                &installation.org,
                self.gateway.clone(),
                self.connector.clone(),
                self.pipeline.clone(),
                self.monitor_config.clone(),
            );
            monitor.start();
            monitors.insert(installation.org.clone(), monitor);
        }
    }

    fn stop_all_monitors(&self) {
        let mut monitors = self.monitors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, monitor) in monitors.drain() {
            monitor.stop();
        }
    }

    /// Currently-monitored organizations, mostly for observability and tests.
    pub fn monitored_orgs(&self) -> Vec<String> {
        let monitors = self.monitors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        monitors.keys().cloned().collect()
    }
}
