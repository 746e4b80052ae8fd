//! In-memory, process-lifetime counters surfaced through the health endpoint.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Shared service counters. Counters are atomics; the membership sets sit behind mutexes and are
/// only ever locked for a membership insert or a length read.
#[derive(Default)]
pub struct Metrics {
    orgs_seen: Mutex<HashSet<String>>,
    prs_seen: Mutex<HashSet<String>>,
    prs_modified: Mutex<HashSet<String>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    total_runs: AtomicU64,
    polling: AtomicBool,
}

/// A point-in-time copy of the counters, for rendering.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub orgs_seen: usize,
    pub prs_seen: usize,
    pub prs_modified: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub polling: bool,
}

impl Metrics {
    pub fn record_org(&self, org: &str) {
        self.orgs_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(org.to_string());
    }

    pub fn record_pr_seen(&self, pr_key: &str) {
        self.prs_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pr_key.to_string());
    }

    pub fn record_pr_modified(&self, pr_key: &str) {
        self.prs_modified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pr_key.to_string());
    }

    /// Flags a sweep as in-flight; `false` means one already is.
    pub fn try_begin_run(&self) -> bool {
        self.polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish_run(&self, finished_at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(finished_at);
        self.total_runs.fetch_add(1, Ordering::SeqCst);
        self.polling.store(false, Ordering::SeqCst);
    }

    pub fn polling_in_progress(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orgs_seen: self
                .orgs_seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            prs_seen: self
                .prs_seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            prs_modified: self
                .prs_modified
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            last_run: *self.last_run.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            total_runs: self.total_runs.load(Ordering::SeqCst),
            polling: self.polling.load(Ordering::SeqCst),
        }
    }
}
