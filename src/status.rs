//! Status cache, aggregation of probe sources, and the query facade.
use chrono::Utc;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NodeError, StatusError};
use crate::history::HistoryTracker;
use crate::model::{
    BriefStatus, DetailedStatus, ServiceStatus, Snapshot, Transition, UNASSOCIATED_SERVER,
};
use crate::probe::{HttpNodeClient, NodeClient, ProcessTable, SysinfoProcessTable, probe_local};
use crate::report::{DetailedReport, build_report, diff_snapshots, render_transition};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct CacheState {
    snapshot: Arc<Snapshot>,
    history: HistoryTracker,
}

/// Thread-safe cache of the most recent snapshot and per-node failures.
///
/// Both are replaced together; readers only ever see a complete refresh.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<RwLock<CacheState>>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheState {
                snapshot: Arc::new(Snapshot::empty()),
                history: HistoryTracker::new(),
            })),
        }
    }

    /// Returns a shared reference to the cached snapshot.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, StatusError> {
        Ok(Arc::clone(&self.inner.read()?.snapshot))
    }

    /// Returns a copy of the failure history.
    pub fn history(&self) -> Result<HistoryTracker, StatusError> {
        Ok(self.inner.read()?.history.clone())
    }

    fn replace(&self, snapshot: Snapshot, history: HistoryTracker) -> Result<(), StatusError> {
        let mut guard = self.inner.write()?;
        guard.snapshot = Arc::new(snapshot);
        guard.history = history;
        Ok(())
    }
}

/// Demand-driven status engine: probes sources when the cache is stale and answers reads.
pub struct StatusEngine {
    config: Config,
    cache: StatusCache,
    refresh_lock: Mutex<()>,
    processes: Arc<dyn ProcessTable>,
    nodes: Arc<dyn NodeClient>,
}

impl StatusEngine {
    /// Builds an engine probing the real process table and nodes over HTTP.
    pub fn from_config(config: Config) -> Result<Self, StatusError> {
        let client = HttpNodeClient::new(config.request_timeout)?;
        Ok(Self::new(
            config,
            Arc::new(SysinfoProcessTable),
            Arc::new(client),
        ))
    }

    pub fn new(
        config: Config,
        processes: Arc<dyn ProcessTable>,
        nodes: Arc<dyn NodeClient>,
    ) -> Self {
        Self {
            config,
            cache: StatusCache::new(),
            refresh_lock: Mutex::new(()),
            processes,
            nodes,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cached snapshot as of the last refresh, without refreshing.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, StatusError> {
        self.cache.snapshot()
    }

    /// Name to online flag, refreshed first if older than the refresh interval.
    pub fn get_status(&self) -> Result<BTreeMap<String, BriefStatus>, StatusError> {
        self.update_status(false)?;
        Ok(self.cache.snapshot()?.brief())
    }

    /// Name to full status, refreshed first if older than the refresh interval.
    pub fn get_detailed_status(&self) -> Result<BTreeMap<String, DetailedStatus>, StatusError> {
        self.update_status(false)?;
        Ok(self.cache.snapshot()?.detailed())
    }

    /// Services that changed state in the most recent refresh, without refreshing.
    pub fn last_transitions(&self) -> Result<Vec<Transition>, StatusError> {
        Ok(self.cache.snapshot()?.changes.clone())
    }

    /// Servers whose latest probe failed, mapped to the failure reason.
    pub fn get_down_server(&self) -> Result<BTreeMap<String, String>, StatusError> {
        Ok(self.cache.history()?.down_servers())
    }

    /// Detailed status grouped by server and type, with node failures applied.
    pub fn detailed_report(&self) -> Result<DetailedReport, StatusError> {
        let detailed = self.get_detailed_status()?;
        let down = self.get_down_server()?;
        Ok(build_report(&detailed, &down, self.config.nodes.keys()))
    }

    /// Refreshes the cache if it is stale, or unconditionally when `force` is set.
    ///
    /// At most one refresh runs at a time. A caller that finds a refresh in flight waits
    /// for it and is served its result instead of starting another.
    pub fn update_status(&self, force: bool) -> Result<(), StatusError> {
        let requested_at = Instant::now();
        let current = self.cache.snapshot()?;
        if !force && self.is_fresh(&current, requested_at) {
            return Ok(());
        }

        let _guard = self.acquire_refresh_lock()?;

        let previous = self.cache.snapshot()?;
        let already_served = if force {
            previous
                .refreshed_at
                .is_some_and(|refreshed| refreshed >= requested_at)
        } else {
            self.is_fresh(&previous, Instant::now())
        };
        if already_served {
            debug!(
                "refresh generation {} completed while waiting, reusing it",
                previous.generation
            );
            return Ok(());
        }

        self.refresh(&previous)
    }

    fn is_fresh(&self, snapshot: &Snapshot, now: Instant) -> bool {
        snapshot.refreshed_at.is_some_and(|refreshed| {
            now.saturating_duration_since(refreshed) < self.config.refresh_interval
        })
    }

    fn acquire_refresh_lock(&self) -> Result<MutexGuard<'_, ()>, StatusError> {
        let deadline = Instant::now() + self.config.lock_timeout;
        loop {
            match self.refresh_lock.try_lock() {
                Ok(guard) => return Ok(guard),
                // The lock guards no data, a panicked refresh leaves nothing half-written.
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }

            if Instant::now() >= deadline {
                return Err(StatusError::LockTimeout(self.config.lock_timeout));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Probes every source, merges the results and swaps them into the cache.
    fn refresh(&self, previous: &Snapshot) -> Result<(), StatusError> {
        let started = Instant::now();

        let (local, remote) = thread::scope(|scope| {
            let handles: Vec<_> = self
                .config
                .nodes
                .iter()
                .map(|(id, node)| {
                    let client = &self.nodes;
                    (id, node, scope.spawn(move || client.fetch(id, node)))
                })
                .collect();

            let local = probe_local(
                &self.config.status_dir,
                &self.config.interpreter_prefix,
                self.processes.as_ref(),
            );

            let remote: Vec<(String, Result<Vec<ServiceStatus>, NodeError>)> = handles
                .into_iter()
                .map(|(id, node, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(NodeError::Panicked {
                            address: node.address.clone(),
                        })
                    });
                    (id.clone(), outcome)
                })
                .collect();

            (local, remote)
        });

        let local = local?;
        let mut history = self.cache.history()?;
        let mut services = BTreeMap::new();

        for status in local {
            merge_status(&mut services, status);
        }

        for (node_id, outcome) in remote {
            match outcome {
                Ok(statuses) => {
                    debug!("node '{node_id}' reported {} services", statuses.len());
                    if history.record_success(&node_id) {
                        info!("node '{node_id}' is reachable again");
                    }
                    for status in statuses {
                        merge_status(&mut services, status);
                    }
                }
                Err(err) => {
                    warn!("failed to fetch status from node '{node_id}': {err}");
                    history.record_failure(&node_id, err.to_string());
                }
            }
        }

        for name in &self.config.services {
            if !services.contains_key(name) {
                services.insert(
                    name.clone(),
                    ServiceStatus::offline(name.clone(), UNASSOCIATED_SERVER),
                );
            }
        }

        let changes = if previous.generation == 0 {
            Vec::new()
        } else {
            diff_snapshots(&previous.services, &services)
        };
        for change in &changes {
            info!("{}", render_transition(change));
        }

        let snapshot = Snapshot {
            generation: previous.generation + 1,
            captured_at: Utc::now().max(previous.captured_at),
            refreshed_at: Some(Instant::now()),
            services,
            changes,
        };

        info!(
            "refreshed status generation {} in {:?}: {} services, {} nodes down",
            snapshot.generation,
            started.elapsed(),
            snapshot.services.len(),
            history.down_servers().len()
        );

        self.cache.replace(snapshot, history)
    }
}

/// Inserts `status`, keeping the later entry when two sources report the same name.
fn merge_status(services: &mut BTreeMap<String, ServiceStatus>, status: ServiceStatus) {
    let name = status.name.clone();
    let server = status.server.clone();
    if let Some(previous) = services.insert(name.clone(), status) {
        warn!(
            "service '{name}' reported by both '{}' and '{server}', keeping '{server}'",
            previous.server
        );
    }
}
