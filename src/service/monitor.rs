//! One monitor per installed organization: a connection manager that keeps the push
//! subscription alive with backed-off reconnects, an event handler that deduplicates and
//! enqueues, and a processor that drains the bounded queue into the per-PR pipeline.
//!
//! The three tasks share a single reader/writer-locked state block; the lock is never held
//! across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::error::AssignError;
use crate::github::events::{EventConnector, EventKind, PushEvent};
use crate::github::gateway::GitHubGateway;
use crate::locator::PrLocator;
use crate::service::pipeline::Pipeline;

/// Tunables for a monitor. Defaults match production behavior; tests shrink them.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Events for one URL within this window collapse into a single job.
    pub dedup_window: Duration,
    /// Dedup entries above this count trigger a cull of old entries.
    pub dedup_max_entries: usize,
    /// Dedup entries older than this are removed by the cull.
    pub dedup_cull_age: Duration,
    /// Bounded event-queue capacity; events beyond it are dropped.
    pub queue_capacity: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_step: Duration,
    pub reconnect_cap: Duration,
    pub health_interval: Duration,
    pub disconnect_warning_after: Duration,
    pub process_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            dedup_window: Duration::from_secs(5),
            dedup_max_entries: 1000,
            dedup_cull_age: Duration::from_secs(60 * 60),
            queue_capacity: 100,
            max_reconnect_attempts: 100,
            reconnect_step: Duration::from_secs(30),
            reconnect_cap: Duration::from_secs(5 * 60),
            health_interval: Duration::from_secs(2 * 60),
            disconnect_warning_after: Duration::from_secs(5 * 60),
            process_retries: 3,
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(10),
        }
    }
}

struct MonitorState {
    connected: bool,
    last_connected: Option<Instant>,
    last_event: Option<Instant>,
    running: bool,
    stopped: bool,
    reconnect_attempts: u32,
    last_seen: HashMap<String, Instant>,
}

pub struct OrgMonitor {
    org: String,
    gateway: Arc<dyn GitHubGateway>,
    connector: Arc<dyn EventConnector>,
    pipeline: Arc<Pipeline>,
    config: MonitorConfig,
    state: RwLock<MonitorState>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<Option<mpsc::Receiver<String>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl OrgMonitor {
    pub fn new(
        org: &str, gateway: Arc<dyn GitHubGateway>, connector: Arc<dyn EventConnector>,
        pipeline: Arc<Pipeline>, config: MonitorConfig,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        Arc::new(OrgMonitor {
            org: org.to_string(),
            gateway,
            connector,
            pipeline,
            config,
            state: RwLock::new(MonitorState {
                connected: false,
                last_connected: None,
                last_event: None,
                running: false,
                stopped: false,
                reconnect_attempts: 0,
                last_seen: HashMap::new(),
            }),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            stop_tx,
            stop_rx,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn is_running(&self) -> bool {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner()).running
    }

    /// Spawns the monitor's three tasks. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state =
                self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.running || state.stopped {
                return;
            }
            state.running = true;
        }

        info!("Starting monitor for [{}].", self.org);

        let connection = self.clone();
        tokio::spawn(async move { connection.connection_loop().await });

        let processor = self.clone();
        tokio::spawn(async move { processor.process_loop().await });

        let health = self.clone();
        tokio::spawn(async move { health.health_loop().await });
    }

    /// Signals all tasks to exit. Idempotent.
    pub fn stop(&self) {
        {
            let mut state =
                self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.stopped {
                debug!("Monitor for [{}] is already stopped.", self.org);
                return;
            }
            state.stopped = true;
            state.running = false;
        }

        let _ = self.stop_tx.send(true);
        info!("Stopped monitor for [{}].", self.org);
    }

    /// Validates, deduplicates and enqueues one inbound event. Returns whether the event was
    /// actually enqueued.
    pub fn handle_event(&self, event: PushEvent) -> bool {
        if event.kind != EventKind::PullRequest {
            trace!("Ignoring [{}] event for [{}].", event.kind, self.org);
            return false;
        }

        let locator: PrLocator = match event.url.parse() {
            Ok(locator) => locator,
            Err(_) => {
                debug!("Ignoring event with unparseable URL [{}] for [{}].", event.url, self.org);
                return false;
            }
        };

        if !locator.owner.eq_ignore_ascii_case(&self.org) {
            // can happen in the window between an installation removal and monitor teardown
            debug!(
                "Ignoring event for [{}]; it belongs to [{}], not [{}].",
                event.url, locator.owner, self.org
            );
            return false;
        }

        let now = Instant::now();
        {
            let mut state =
                self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.last_event = Some(now);

            if let Some(seen_at) = state.last_seen.get(&event.url) {
                if now.duration_since(*seen_at) < self.config.dedup_window {
                    trace!("Collapsing duplicate event for [{}].", event.url);
                    return false;
                }
            }
            state.last_seen.insert(event.url.clone(), now);

            if state.last_seen.len() > self.config.dedup_max_entries {
                let cull_age = self.config.dedup_cull_age;
                let before = state.last_seen.len();
                state.last_seen.retain(|_, seen_at| now.duration_since(*seen_at) <= cull_age);
                debug!(
                    "Culled dedup map for [{}] from [{}] to [{}] entries.",
                    self.org,
                    before,
                    state.last_seen.len()
                );
            }
        }

        match self.queue_tx.try_send(event.url.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!("Event queue for [{}] is full; dropping [{}].", self.org, event.url);
                false
            }
        }
    }

    /// How many URLs the dedup map currently tracks.
    pub fn dedup_entries(&self) -> usize {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner()).last_seen.len()
    }

    // connection manager ---

    async fn connection_loop(&self) {
        let mut stop = self.stop_rx.clone();

        loop {
            if *stop.borrow() {
                break;
            }

            let attempts = self
                .state
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .reconnect_attempts;
            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    "Giving up on the event bus for [{}] after [{}] reconnect attempts; the \
                     periodic sweep remains the only coverage.",
                    self.org, attempts
                );
                break;
            }

            if let Err(e) = self.connect_and_pump().await {
                warn!("Event subscription for [{}] failed: {}", self.org, e);
            }

            let attempts = {
                let mut state =
                    self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                state.connected = false;
                state.reconnect_attempts += 1;
                state.reconnect_attempts
            };

            let wait = (self.config.reconnect_step * attempts).min(self.config.reconnect_cap);
            debug!("Reconnecting to the event bus for [{}] in {:?}.", self.org, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.changed() => break,
            }
        }
    }

    /// One full subscription lifetime: token, connect, pump events until the stream closes.
    async fn connect_and_pump(&self) -> Result<(), AssignError> {
        let token = self.gateway.installation_token(&self.org).await?;
        let mut source = self.connector.connect(&self.org, &token).await?;

        {
            let mut state =
                self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.connected = true;
            state.last_connected = Some(Instant::now());
            state.reconnect_attempts = 0;
        }
        info!("Connected to the event bus for [{}].", self.org);

        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => return Ok(()),
                event = source.next_event() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    // event processor ---

    async fn process_loop(&self) {
        let receiver = self
            .queue_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let mut receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                error!("Event queue for [{}] was already claimed; processor exiting.", self.org);
                return;
            }
        };

        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                received = receiver.recv() => match received {
                    Some(url) => self.process_event(&url).await,
                    None => break,
                },
            }
        }
    }

    async fn process_event(&self, url: &str) {
        let locator: PrLocator = match url.parse() {
            Ok(locator) => locator,
            Err(e) => {
                warn!("Dequeued an unparseable URL for [{}]: {}", self.org, e);
                return;
            }
        };

        for attempt in 1..=self.config.process_retries {
            match self.pipeline.process(&locator).await {
                Ok(_) => return,
                Err(e) => {
                    warn!(
                        "Attempt [{}/{}] on [{}] failed: {}",
                        attempt, self.config.process_retries, locator, e
                    );

                    if attempt < self.config.process_retries {
                        tokio::time::sleep(self.retry_wait(attempt)).await;
                    }
                }
            }
        }

        error!(
            "Giving up on [{}] after [{}] attempts; the next sweep will retry it.",
            locator, self.config.process_retries
        );
    }

    /// Exponential backoff with uniform jitter, capped.
    fn retry_wait(&self, attempt: u32) -> Duration {
        let exponential =
            self.config.retry_base.saturating_mul(1u32 << (attempt - 1).min(16));
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));

        (exponential + jitter).min(self.config.retry_cap)
    }

    // health tick ---

    async fn health_loop(&self) {
        let mut stop = self.stop_rx.clone();
        let mut ticker = tokio::time::interval(self.config.health_interval);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => self.report_health(),
            }
        }
    }

    fn report_health(&self) {
        let (connected, last_connected, attempts) = {
            let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            (state.connected, state.last_connected, state.reconnect_attempts)
        };

        if connected {
            debug!("Monitor for [{}] is connected.", self.org);
            return;
        }

        match last_connected {
            Some(at) if at.elapsed() > self.config.disconnect_warning_after => warn!(
                "Monitor for [{}] has been disconnected for {:?} (reconnect attempts so far: [{}]).",
                self.org,
                at.elapsed(),
                attempts
            ),
            _ => debug!(
                "Monitor for [{}] is between connections (reconnect attempts so far: [{}]).",
                self.org, attempts
            ),
        }
    }
}
