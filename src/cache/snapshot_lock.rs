//! Copy-on-write publication of snapshots.
//!
//! Readers load the current `Arc<Snapshot>` with a single atomic read and may
//! keep it as long as they like. Writers serialize on one mutex, mutate a
//! private clone, and publish it with an atomic swap. A [`Scope`] enlists at
//! most one writer so that many edits cost a single clone and commit.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use metrics::counter;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::domain::snapshot::Snapshot;

/// Notified after every successful commit, while the writer lock is still held.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, snapshot: &Arc<Snapshot>, register_persist: bool);
}

pub struct SnapshotLock {
    current: ArcSwap<Snapshot>,
    writer: Arc<Mutex<()>>,
    observers: Vec<Arc<dyn CommitObserver>>,
    clones: AtomicU64,
    commits: AtomicU64,
}

impl SnapshotLock {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Arc::new(Mutex::new(())),
            observers: Vec::new(),
            clones: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The currently published snapshot. Never blocks on writers.
    pub fn read(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Wait for the writer lock and clone the current snapshot.
    pub async fn write(&self) -> WriteHandle<'_> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        self.open(guard)
    }

    /// Blocking flavour of [`write`](Self::write) for synchronous callers.
    ///
    /// Must not be called from within an async execution context.
    pub fn blocking_write(&self) -> WriteHandle<'_> {
        let guard = Arc::clone(&self.writer).blocking_lock_owned();
        self.open(guard)
    }

    /// Start a logical scope; the first [`Scope::writer`] call enlists a writer.
    pub fn scope(&self, register_persist: bool) -> Scope<'_> {
        Scope {
            lock: self,
            handle: None,
            register_persist,
        }
    }

    /// Publish the working copy of `handle`, then notify observers.
    pub fn commit(&self, handle: WriteHandle<'_>, register_persist: bool) -> Arc<Snapshot> {
        let WriteHandle {
            working, _guard, ..
        } = handle;
        let published = Arc::new(working);
        self.current.store(Arc::clone(&published));
        self.commits.fetch_add(1, Ordering::Relaxed);
        counter!("pubcache_snapshot_commit_total").increment(1);

        for observer in &self.observers {
            observer.on_commit(&published, register_persist);
        }
        debug!(
            nodes = published.len(),
            register_persist, "Published snapshot"
        );
        // The writer guard drops here, after observers ran.
        published
    }

    /// Replace the published snapshot wholesale (full reload).
    pub async fn replace(&self, snapshot: Snapshot, register_persist: bool) -> Arc<Snapshot> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let handle = WriteHandle {
            _guard: guard,
            working: snapshot,
            lock: self,
        };
        self.commit(handle, register_persist)
    }

    /// Like [`replace`](Self::replace) but gives up while another writer is active.
    pub fn try_replace(&self, snapshot: Snapshot, register_persist: bool) -> Option<Arc<Snapshot>> {
        let guard = Arc::clone(&self.writer).try_lock_owned().ok()?;
        let handle = WriteHandle {
            _guard: guard,
            working: snapshot,
            lock: self,
        };
        Some(self.commit(handle, register_persist))
    }

    /// Number of working copies cloned so far.
    pub fn clone_count(&self) -> u64 {
        self.clones.load(Ordering::Relaxed)
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    fn open(&self, guard: OwnedMutexGuard<()>) -> WriteHandle<'_> {
        let working = Snapshot::clone(&self.current.load());
        self.clones.fetch_add(1, Ordering::Relaxed);
        counter!("pubcache_snapshot_clone_total").increment(1);
        WriteHandle {
            _guard: guard,
            working,
            lock: self,
        }
    }
}

/// Exclusive, private working copy of the published snapshot.
///
/// Dropping the handle without committing discards every change.
pub struct WriteHandle<'a> {
    _guard: OwnedMutexGuard<()>,
    working: Snapshot,
    lock: &'a SnapshotLock,
}

impl WriteHandle<'_> {
    /// Publish this working copy through the lock it was opened on.
    pub fn commit(self, register_persist: bool) -> Arc<Snapshot> {
        let lock = self.lock;
        lock.commit(self, register_persist)
    }
}

impl Deref for WriteHandle<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.working
    }
}

impl DerefMut for WriteHandle<'_> {
    fn deref_mut(&mut self) -> &mut Snapshot {
        &mut self.working
    }
}

/// A logical transaction over the snapshot.
///
/// Edits made through [`writer`](Self::writer) share one working copy;
/// [`complete`](Self::complete) publishes it, dropping the scope rolls back.
pub struct Scope<'a> {
    lock: &'a SnapshotLock,
    handle: Option<WriteHandle<'a>>,
    register_persist: bool,
}

impl<'a> Scope<'a> {
    /// The enlisted writer, acquired on first use.
    pub async fn writer(&mut self) -> &mut WriteHandle<'a> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => self.lock.write().await,
        };
        self.handle.insert(handle)
    }

    /// Run `f` against the working copy when enlisted, else the published snapshot.
    pub fn view<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        match &self.handle {
            Some(handle) => f(&handle.working),
            None => f(self.lock.read().as_ref()),
        }
    }

    /// Returns true once a writer has been enlisted.
    pub fn is_enlisted(&self) -> bool {
        self.handle.is_some()
    }

    /// Commit the enlisted writer, if any.
    pub fn complete(mut self) -> Option<Arc<Snapshot>> {
        let handle = self.handle.take()?;
        Some(handle.commit(self.register_persist))
    }
}
