//! Debounced background persistence of committed snapshots.
//!
//! Every committed snapshot that asks for persistence touches the sidecar.
//! A touch (re)arms a quiet-period deadline; once a burst has lasted longer
//! than the max delay, further touches no longer push the deadline back. When
//! the deadline passes, the latest committed snapshot is written by the
//! [`SnapshotSink`] outside of any lock. Only the leader ever writes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::snapshot::Snapshot;

use super::config::CacheConfig;
use super::file::{SnapshotFileError, write_snapshot};
use super::leadership::LeadershipToken;
use super::lock::mutex_lock;
use super::snapshot_lock::CommitObserver;

const SOURCE: &str = "cache::persister";
const METRIC_PERSIST_MS: &str = "pubcache_persist_ms";
const METRIC_PERSIST_FAILURE: &str = "pubcache_persist_failure_total";

/// Destination of flushed snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Write `snapshot` durably; returns the number of bytes written.
    async fn flush(&self, snapshot: Arc<Snapshot>) -> Result<u64, SnapshotFileError>;
}

/// Writes snapshots to the configured file on the blocking pool.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSink for FileSink {
    async fn flush(&self, snapshot: Arc<Snapshot>) -> Result<u64, SnapshotFileError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|err| SnapshotFileError::Io(std::io::Error::other(err)))?
    }
}

#[derive(Default)]
struct DebounceState {
    pending: Option<Arc<Snapshot>>,
    burst_started: Option<Instant>,
    deadline: Option<Instant>,
    stopped: bool,
}

struct SidecarInner {
    sink: Arc<dyn SnapshotSink>,
    leadership: LeadershipToken,
    quiet_period: Duration,
    max_delay: Duration,
    state: Mutex<DebounceState>,
    wake: Notify,
    writes: AtomicU64,
    failures: AtomicU64,
}

pub struct PersistenceSidecar {
    inner: Arc<SidecarInner>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceSidecar {
    /// Create the sidecar and start its timer task on the current runtime.
    pub fn spawn(
        config: &CacheConfig,
        sink: Arc<dyn SnapshotSink>,
        leadership: LeadershipToken,
    ) -> Arc<Self> {
        let inner = Arc::new(SidecarInner {
            sink,
            leadership,
            quiet_period: config.quiet_period,
            max_delay: config.max_delay,
            state: Mutex::new(DebounceState::default()),
            wake: Notify::new(),
            writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let runner = tokio::spawn(run(Arc::clone(&inner)));
        Arc::new(Self {
            inner,
            runner: Mutex::new(Some(runner)),
        })
    }

    /// Record that `snapshot` was committed and should eventually be written.
    pub fn touch(&self, snapshot: &Arc<Snapshot>) {
        if !self.inner.leadership.is_held() {
            return;
        }

        {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "touch");
            if state.stopped {
                return;
            }
            let now = Instant::now();
            state.pending = Some(Arc::clone(snapshot));
            match state.burst_started {
                None => {
                    state.burst_started = Some(now);
                    state.deadline = Some(now + self.inner.quiet_period);
                }
                Some(started) if now.duration_since(started) < self.inner.max_delay => {
                    state.deadline = Some(now + self.inner.quiet_period);
                }
                Some(_) => {}
            }
        }
        self.inner.wake.notify_one();
    }

    /// Returns true while a write is scheduled.
    pub fn has_pending(&self) -> bool {
        mutex_lock(&self.inner.state, SOURCE, "has_pending")
            .pending
            .is_some()
    }

    /// Write the pending snapshot immediately. Returns true if a write happened.
    pub async fn flush_pending(&self) -> bool {
        let pending = take_pending(&self.inner, "flush_pending");
        match pending {
            Some(snapshot) => self.inner.write(snapshot).await,
            None => false,
        }
    }

    /// Stop the timer task, then write a pending snapshot once if this
    /// instance still holds leadership.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        mutex_lock(&self.inner.state, SOURCE, "shutdown").stopped = true;
        self.inner.wake.notify_one();

        let runner = mutex_lock(&self.runner, SOURCE, "shutdown").take();
        if let Some(runner) = runner
            && let Err(err) = runner.await
        {
            warn!(error = %err, "Persistence timer task ended abnormally");
        }

        if let Some(snapshot) = take_pending(&self.inner, "shutdown") {
            if self.inner.leadership.is_held() {
                info!("Flushing pending snapshot before shutdown");
                self.inner.write(snapshot).await;
            } else {
                debug!("Dropping pending snapshot: leadership not held");
            }
        }
    }

    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }
}

impl CommitObserver for PersistenceSidecar {
    fn on_commit(&self, snapshot: &Arc<Snapshot>, register_persist: bool) {
        if register_persist {
            self.touch(snapshot);
        }
    }
}

impl Drop for PersistenceSidecar {
    fn drop(&mut self) {
        if let Some(runner) = mutex_lock(&self.runner, SOURCE, "drop").take() {
            runner.abort();
        }
    }
}

impl SidecarInner {
    async fn write(&self, snapshot: Arc<Snapshot>) -> bool {
        if !self.leadership.is_held() {
            debug!("Skipping snapshot write: leadership not held");
            return false;
        }

        let started = std::time::Instant::now();
        let nodes = snapshot.len();
        match self.sink.flush(snapshot).await {
            Ok(bytes) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                let elapsed = started.elapsed();
                histogram!(METRIC_PERSIST_MS).record(elapsed.as_secs_f64() * 1000.0);
                info!(
                    nodes,
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Snapshot persisted"
                );
                true
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_PERSIST_FAILURE).increment(1);
                error!(error = %err, nodes, "Failed to persist snapshot");
                false
            }
        }
    }
}

fn take_pending(inner: &SidecarInner, op: &'static str) -> Option<Arc<Snapshot>> {
    let mut state = mutex_lock(&inner.state, SOURCE, op);
    state.burst_started = None;
    state.deadline = None;
    state.pending.take()
}

async fn run(inner: Arc<SidecarInner>) {
    loop {
        let deadline = {
            let state = mutex_lock(&inner.state, SOURCE, "run");
            if state.stopped {
                break;
            }
            state.deadline
        };

        match deadline {
            None => inner.wake.notified().await,
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {
                        let due = {
                            let mut state = mutex_lock(&inner.state, SOURCE, "run");
                            if state.deadline.is_some_and(|current| current <= Instant::now()) {
                                state.burst_started = None;
                                state.deadline = None;
                                state.pending.take()
                            } else {
                                None
                            }
                        };
                        if let Some(snapshot) = due {
                            inner.write(snapshot).await;
                        }
                    }
                    _ = inner.wake.notified() => {}
                }
            }
        }
    }
}
