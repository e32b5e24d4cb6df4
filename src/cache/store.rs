//! The published tree of one kind, kept current by change notifications.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Instant, SystemTime};

use arc_swap::ArcSwap;
use metrics::{counter, histogram};
use pubcache_api_types::{
    CONTENT_TYPE_ITEM, ContentTypeChangeKind, ContentTypeChangePayload, ChangePayload,
    NotifyOutcome,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};

use crate::application::repos::{ContentSource, RepoError};
use crate::domain::node::Node;
use crate::domain::snapshot::Snapshot;
use crate::domain::types::{ContentType, TreeKind};

use super::applier::{ChangeApplier, add_or_update};
use super::config::CacheConfig;
use super::content_types::ContentTypeCache;
use super::error::CacheError;
use super::file::{SnapshotFileError, modified, read_snapshot, remove_if_exists};
use super::leadership::LeadershipToken;
use super::loader::{DatabaseLoader, decode_rows};
use super::lock::mutex_lock;
use super::persister::{FileSink, PersistenceSidecar};
use super::resolver::{DomainRoots, domain_roots};
use super::routes::RoutesCache;
use super::snapshot_lock::{CommitObserver, SnapshotLock};

const SOURCE: &str = "cache::store";
const METRIC_NOTIFY_MS: &str = "pubcache_notify_ms";
const METRIC_COLD_START_MS: &str = "pubcache_cold_start_ms";
const METRIC_SCHEMA_REPAIR: &str = "pubcache_schema_repair_total";

#[derive(Default)]
struct FileSync {
    last_check: Option<Instant>,
    seen: Option<SystemTime>,
}

pub struct XmlTreeStore {
    me: Weak<XmlTreeStore>,
    kind: TreeKind,
    config: CacheConfig,
    source: Arc<dyn ContentSource>,
    loader: DatabaseLoader,
    lock: SnapshotLock,
    routes: Arc<RoutesCache>,
    domains: ArcSwap<DomainRoots>,
    content_types: ContentTypeCache,
    persister: Option<Arc<PersistenceSidecar>>,
    leadership: LeadershipToken,
    file_released: AtomicBool,
    repair_scheduled: AtomicBool,
    repair_running: AtomicBool,
    file_sync: Mutex<FileSync>,
}

impl XmlTreeStore {
    /// Build the store and publish its first snapshot, from the snapshot file
    /// when allowed and readable, else from the database.
    #[instrument(skip(config, source, leadership))]
    pub async fn open(
        kind: TreeKind,
        config: CacheConfig,
        source: Arc<dyn ContentSource>,
        leadership: LeadershipToken,
    ) -> Result<Arc<Self>, CacheError> {
        let routes = Arc::new(RoutesCache::new(&config));
        let persister = config.persists_file().then(|| {
            PersistenceSidecar::spawn(
                &config,
                Arc::new(FileSink::new(config.file_path.clone())),
                leadership.clone(),
            )
        });

        let mut lock = SnapshotLock::new(Snapshot::new(kind))
            .with_observer(Arc::clone(&routes) as Arc<dyn CommitObserver>);
        if let Some(persister) = &persister {
            lock = lock.with_observer(Arc::clone(persister) as Arc<dyn CommitObserver>);
        }

        let store = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            kind,
            config,
            loader: DatabaseLoader::new(Arc::clone(&source)),
            source,
            lock,
            routes,
            domains: ArcSwap::from_pointee(DomainRoots::new()),
            content_types: ContentTypeCache::new(),
            persister,
            leadership,
            file_released: AtomicBool::new(false),
            repair_scheduled: AtomicBool::new(false),
            repair_running: AtomicBool::new(false),
            file_sync: Mutex::new(FileSync::default()),
        });

        store.refresh_content_types().await?;
        store.refresh_domains().await?;
        store.cold_start().await?;
        Ok(store)
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn routes(&self) -> &RoutesCache {
        &self.routes
    }

    pub fn lock(&self) -> &SnapshotLock {
        &self.lock
    }

    pub fn persister(&self) -> Option<&Arc<PersistenceSidecar>> {
        self.persister.as_ref()
    }

    pub fn domains(&self) -> Arc<DomainRoots> {
        self.domains.load_full()
    }

    /// The published snapshot. In sync-from-file mode this first picks up a
    /// newer snapshot file, at most once per check interval.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        if self.config.sync_from_file {
            self.sync_from_file();
        }
        self.lock.read()
    }

    /// Content type of `alias`. A miss means the tree and the known types
    /// disagree; a background reload is scheduled.
    pub fn content_type(&self, alias: &str) -> Option<ContentType> {
        let found = self.content_types.resolve(alias);
        if found.is_none() {
            warn!(alias, "Node references an unknown content type");
            self.schedule_repair();
        }
        found
    }

    /// Returns true while a schema repair is scheduled or running.
    pub fn repair_pending(&self) -> bool {
        self.repair_scheduled.load(Ordering::Acquire)
    }

    /// Apply a batch of change descriptors in one commit.
    #[instrument(skip(self, payloads), fields(kind = %self.kind, count = payloads.len()))]
    pub async fn notify(&self, payloads: &[ChangePayload]) -> Result<NotifyOutcome, CacheError> {
        if payloads.is_empty() {
            return Ok(NotifyOutcome::default());
        }
        let started = Instant::now();

        let applier = ChangeApplier::new(&self.loader, &self.content_types, self.kind);
        let mut scope = self.lock.scope(true);
        let report = applier.apply(&mut scope, payloads).await?;

        let outcome = if report.reload_all {
            drop(scope);
            self.reload().await?;
            NotifyOutcome {
                draft_changed: true,
                published_changed: true,
            }
        } else {
            if report.published_changed {
                scope.complete();
            }
            if !report.unresolved_aliases.is_empty() {
                warn!(aliases = ?report.unresolved_aliases, "Changes reference unknown content types");
                self.schedule_repair();
            }
            NotifyOutcome {
                draft_changed: true,
                published_changed: report.published_changed,
            }
        };

        histogram!(METRIC_NOTIFY_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            published_changed = outcome.published_changed,
            skipped = report.skipped,
            "Applied change batch"
        );
        Ok(outcome)
    }

    /// Refresh known content types and re-read the nodes of every type whose
    /// main definition changed. Returns true if the tree changed.
    #[instrument(skip(self, payloads), fields(kind = %self.kind, count = payloads.len()))]
    pub async fn notify_content_types(
        &self,
        payloads: &[ContentTypeChangePayload],
    ) -> Result<bool, CacheError> {
        self.refresh_content_types().await?;
        // A running repair clears the flag itself when it finishes.
        if !self.repair_running.load(Ordering::Acquire) {
            self.repair_scheduled.store(false, Ordering::Release);
        }

        let ids: Vec<i32> = payloads
            .iter()
            .filter(|payload| {
                payload.item_type == CONTENT_TYPE_ITEM
                    && payload.change_kind.has(ContentTypeChangeKind::REFRESH_MAIN)
            })
            .map(|payload| payload.id)
            .collect();
        if ids.is_empty() {
            return Ok(false);
        }

        let rows = self.source.load_by_content_types(self.kind, &ids).await?;
        let mut scope = self.lock.scope(true);
        let mut changed = false;
        for node in decode_rows(&rows) {
            let id = node.id;
            match add_or_update(scope.writer().await, node) {
                Ok(()) => changed = true,
                Err(err) => warn!(id, error = %err, "Skipping node of refreshed content type"),
            }
        }
        if changed {
            scope.complete();
        }
        Ok(changed)
    }

    /// Re-read domain assignments. Every cached route is dropped.
    pub async fn notify_domains(&self) -> Result<(), CacheError> {
        self.refresh_domains().await?;
        self.routes.clear();
        Ok(())
    }

    /// Replace the tree with a fresh one composed from the database.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn reload(&self) -> Result<Arc<Snapshot>, CacheError> {
        let (snapshot, report) = self.loader.load_tree(self.kind).await?;
        let unresolved = self.unresolved_aliases(&snapshot);
        let published = self.lock.replace(snapshot, true).await;
        info!(
            nodes = published.len(),
            orphaned = report.orphaned,
            undecodable = report.undecodable,
            "Reloaded tree from the database"
        );
        if !unresolved.is_empty() {
            warn!(aliases = ?unresolved, "Tree references unknown content types");
            self.schedule_repair();
        }
        Ok(published)
    }

    /// Regenerate serialized rows in the database, then reload what changed.
    #[instrument(skip(self, content_type_ids), fields(kind = %self.kind))]
    pub async fn rebuild(
        &self,
        group_size: usize,
        content_type_ids: Option<&[i32]>,
    ) -> Result<u64, CacheError> {
        if group_size == 0 {
            return Err(RepoError::InvalidInput {
                message: "group size must be positive".to_string(),
            }
            .into());
        }
        let written = self
            .source
            .rebuild(self.kind, group_size, content_type_ids)
            .await?;
        match content_type_ids {
            Some(ids) => {
                let payloads: Vec<ContentTypeChangePayload> = ids
                    .iter()
                    .copied()
                    .map(ContentTypeChangePayload::refresh_main)
                    .collect();
                self.notify_content_types(&payloads).await?;
            }
            None => {
                self.refresh_content_types().await?;
                self.reload().await?;
            }
        }
        info!(written, "Rebuilt serialized rows");
        Ok(written)
    }

    /// The published tree overlaid with the latest rows of `content_id`'s
    /// ancestors-or-self (and descendants on request). Never published.
    pub async fn preview_snapshot(
        &self,
        content_id: i32,
        include_descendants: bool,
    ) -> Result<Arc<Snapshot>, CacheError> {
        let rows = self
            .source
            .load_preview(content_id, include_descendants)
            .await?;
        let mut preview = Snapshot::clone(&self.snapshot());
        for row in &rows {
            let mut node = match Node::from_row(row) {
                Ok(node) => node,
                Err(err) => {
                    warn!(id = row.id, error = %err, "Skipping undecodable preview row");
                    continue;
                }
            };
            node.is_draft = !row.published;
            if let Err(err) = add_or_update(&mut preview, node) {
                debug!(id = row.id, error = %err, "Preview row does not fit the tree");
            }
        }
        Ok(Arc::new(preview))
    }

    /// Compose a tree of any kind straight from the database, bypassing the
    /// published snapshot.
    pub async fn load_uncached(&self, kind: TreeKind) -> Result<Snapshot, CacheError> {
        let (snapshot, _) = self.loader.load_tree(kind).await?;
        Ok(snapshot)
    }

    /// Flush any pending write, then stop touching the snapshot file.
    #[instrument(skip(self))]
    pub async fn release_leadership(&self) {
        if let Some(persister) = &self.persister {
            persister.flush_pending().await;
        }
        self.leadership.revoke();
        self.file_released.store(true, Ordering::Release);
        if let Some(persister) = &self.persister {
            persister.shutdown().await;
        }
        info!("Released snapshot file leadership");
    }

    pub async fn shutdown(&self) {
        if let Some(persister) = &self.persister {
            persister.shutdown().await;
        }
    }

    async fn refresh_content_types(&self) -> Result<(), CacheError> {
        let types = self.source.content_types(self.kind).await?;
        debug!(count = types.len(), "Loaded content types");
        self.content_types.replace_all(types);
        Ok(())
    }

    async fn refresh_domains(&self) -> Result<(), CacheError> {
        let assignments = self.source.domain_roots().await?;
        self.domains.store(Arc::new(domain_roots(assignments)));
        Ok(())
    }

    fn file_access(&self) -> bool {
        self.config.file_enabled
            && !self.file_released.load(Ordering::Acquire)
            && (self.leadership.is_held() || self.config.sync_from_file)
    }

    async fn cold_start(&self) -> Result<(), CacheError> {
        let started = Instant::now();
        let from_file = if self.file_access() {
            self.load_file().await
        } else {
            None
        };

        let origin = match from_file {
            Some(snapshot) => {
                let unresolved = self.unresolved_aliases(&snapshot);
                let published = self.lock.replace(snapshot, false).await;
                info!(nodes = published.len(), "Loaded tree from the snapshot file");
                if !unresolved.is_empty() {
                    warn!(aliases = ?unresolved, "Snapshot file references unknown content types");
                    self.schedule_repair();
                }
                "file"
            }
            None => {
                self.reload().await?;
                "database"
            }
        };
        histogram!(METRIC_COLD_START_MS, "source" => origin)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    async fn load_file(&self) -> Option<Snapshot> {
        let path = self.config.file_path.clone();
        let read = tokio::task::spawn_blocking(move || {
            let stamp = modified(&path);
            read_snapshot(&path).map(|snapshot| (snapshot, stamp))
        })
        .await;

        let failure = match read {
            Ok(Ok((snapshot, stamp))) if snapshot.kind() == self.kind => {
                mutex_lock(&self.file_sync, SOURCE, "load_file").seen = stamp;
                return Some(snapshot);
            }
            Ok(Ok((snapshot, _))) => {
                format!("file holds a {} tree", snapshot.kind())
            }
            Ok(Err(SnapshotFileError::Io(err))) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No snapshot file yet");
                return None;
            }
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };

        warn!(error = %failure, "Snapshot file unusable, loading from the database");
        if self.leadership.is_held()
            && let Err(err) = remove_if_exists(&self.config.file_path)
        {
            error!(error = %err, "Failed to delete unusable snapshot file");
        }
        None
    }

    fn sync_from_file(&self) {
        if !self.file_access() {
            return;
        }
        let now = Instant::now();
        let mut sync = mutex_lock(&self.file_sync, SOURCE, "sync_from_file");
        if sync
            .last_check
            .is_some_and(|last| now.duration_since(last) < self.config.file_check_interval)
        {
            return;
        }
        sync.last_check = Some(now);

        let Some(stamp) = modified(&self.config.file_path) else {
            return;
        };
        if sync.seen.is_some_and(|seen| seen >= stamp) {
            return;
        }

        match read_snapshot(&self.config.file_path) {
            Ok(snapshot) if snapshot.kind() == self.kind => {
                if self.lock.try_replace(snapshot, false).is_some() {
                    sync.seen = Some(stamp);
                    info!("Picked up a newer snapshot file");
                } else {
                    // A writer is busy; try again on the next read.
                    sync.last_check = None;
                }
            }
            Ok(snapshot) => {
                warn!(kind = %snapshot.kind(), "Snapshot file holds another tree kind");
                sync.seen = Some(stamp);
            }
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable snapshot file");
                sync.seen = Some(stamp);
            }
        }
    }

    fn unresolved_aliases(&self, snapshot: &Snapshot) -> Vec<String> {
        snapshot
            .schema()
            .filter(|alias| self.content_types.resolve(alias).is_none())
            .map(str::to_string)
            .collect()
    }

    fn schedule_repair(&self) {
        if self.repair_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No runtime available to repair the content type schema");
            self.repair_scheduled.store(false, Ordering::Release);
            return;
        };
        counter!(METRIC_SCHEMA_REPAIR).increment(1);
        let me = self.me.clone();
        handle.spawn(async move {
            if let Some(store) = me.upgrade() {
                store.repair_schema().await;
            }
        });
    }

    async fn repair_schema(&self) {
        if self.repair_running.swap(true, Ordering::AcqRel) {
            debug!("Schema repair already running");
            return;
        }
        info!("Reloading content types and tree after schema drift");
        let result: Result<Arc<Snapshot>, CacheError> = async {
            self.refresh_content_types().await?;
            self.reload().await
        }
        .await;
        self.repair_running.store(false, Ordering::Release);

        match result {
            Ok(snapshot) if self.unresolved_aliases(&snapshot).is_empty() => {
                self.repair_scheduled.store(false, Ordering::Release);
            }
            Ok(_) => {
                // Stays flagged until content types change again.
                error!("Content types still do not cover the tree after reload");
            }
            Err(err) => {
                error!(error = %err, "Schema repair failed");
                self.repair_scheduled.store(false, Ordering::Release);
            }
        }
    }
}
