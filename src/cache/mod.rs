//! Published content cache.
//!
//! The published tree lives in an immutable [`Snapshot`](crate::domain::snapshot::Snapshot)
//! behind a [`SnapshotLock`]. Change notifications are applied to a private
//! copy and published atomically; readers never wait on writers.
//!
//! ## Pieces
//!
//! - [`XmlTreeStore`]: owns the tree, applies notifications, reloads
//! - [`RouteResolver`] and [`RoutesCache`]: route ⇄ id lookups
//! - [`PersistenceSidecar`]: debounced writes of the snapshot file
//! - [`DatabaseLoader`]: composes trees from ordered database rows
//! - [`PublishedContentCache`]: request-scoped read API
//!
//! ## Configuration
//!
//! Behaviour is controlled via the `[cache]` section of `pubcache.toml`:
//!
//! ```toml
//! [cache]
//! file_enabled = true
//! file_path = "data/pubcache/content.json"
//! continuously_update_file = true
//! quiet_period_ms = 4000
//! max_delay_ms = 30000
//! ```

mod applier;
mod config;
mod content_types;
mod error;
mod file;
mod leadership;
mod loader;
pub(crate) mod lock;
mod persister;
mod published;
mod resolver;
mod routes;
mod snapshot_lock;
mod store;

pub use applier::{ApplyReport, ChangeApplier};
pub use config::CacheConfig;
pub use content_types::ContentTypeCache;
pub use error::CacheError;
pub use file::{
    FORMAT_TAG, FORMAT_VERSION, SnapshotFileError, parse_snapshot, read_snapshot,
    remove_if_exists, write_snapshot,
};
pub use leadership::LeadershipToken;
pub use loader::{DatabaseLoader, LoadReport};
pub use persister::{FileSink, PersistenceSidecar, SnapshotSink};
pub use published::{PublishedContent, PublishedContentCache};
pub use resolver::{DomainRoots, RouteLookup, RouteResolver, domain_roots};
pub use routes::RoutesCache;
pub use snapshot_lock::{CommitObserver, Scope, SnapshotLock, WriteHandle};
pub use store::XmlTreeStore;
