//! Bidirectional id ⇄ route cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use metrics::counter;

use crate::domain::snapshot::Snapshot;

use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::snapshot_lock::CommitObserver;

const SOURCE: &str = "cache::routes";

/// At most one route per node and one node per route; both directions are
/// evicted together.
pub struct RoutesCache {
    inner: Mutex<RoutesInner>,
}

struct RoutesInner {
    by_id: LruCache<i32, String>,
    by_route: HashMap<String, i32>,
}

impl RoutesCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(RoutesInner {
                by_id: LruCache::new(config.route_cache_limit_non_zero()),
                by_route: HashMap::new(),
            }),
        }
    }

    pub fn route(&self, id: i32) -> Option<String> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "route");
        let hit = inner.by_id.get(&id).cloned();
        record(hit.is_some());
        hit
    }

    pub fn node_id(&self, route: &str) -> Option<i32> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "node_id");
        let hit = inner.by_route.get(route).copied();
        if let Some(id) = hit {
            inner.by_id.promote(&id);
        }
        record(hit.is_some());
        hit
    }

    pub fn store(&self, id: i32, route: &str) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "store");
        if let Some(previous) = inner.by_route.remove(route)
            && previous != id
        {
            inner.by_id.pop(&previous);
        }
        if let Some((evicted_id, evicted_route)) = inner.by_id.push(id, route.to_string())
            && (evicted_id != id || evicted_route != route)
        {
            inner.by_route.remove(&evicted_route);
        }
        inner.by_route.insert(route.to_string(), id);
    }

    pub fn clear(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        inner.by_id.clear();
        inner.by_route.clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommitObserver for RoutesCache {
    fn on_commit(&self, _snapshot: &Arc<Snapshot>, _register_persist: bool) {
        self.clear();
    }
}

fn record(hit: bool) {
    if hit {
        counter!("pubcache_route_cache_hit_total").increment(1);
    } else {
        counter!("pubcache_route_cache_miss_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(limit: usize) -> RoutesCache {
        RoutesCache::new(&CacheConfig {
            route_cache_limit: limit,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn stores_both_directions() {
        let routes = cache(8);
        routes.store(10, "/home");
        assert_eq!(routes.route(10).as_deref(), Some("/home"));
        assert_eq!(routes.node_id("/home"), Some(10));
        assert_eq!(routes.node_id("/other"), None);
    }

    #[test]
    fn restoring_a_node_drops_its_old_route() {
        let routes = cache(8);
        routes.store(10, "/old");
        routes.store(10, "/new");
        assert_eq!(routes.node_id("/old"), None);
        assert_eq!(routes.node_id("/new"), Some(10));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn a_route_belongs_to_one_node() {
        let routes = cache(8);
        routes.store(10, "/about");
        routes.store(11, "/about");
        assert_eq!(routes.route(10), None);
        assert_eq!(routes.node_id("/about"), Some(11));
    }

    #[test]
    fn eviction_keeps_directions_consistent() {
        let routes = cache(2);
        routes.store(1, "/a");
        routes.store(2, "/b");
        routes.store(3, "/c");
        assert_eq!(routes.node_id("/a"), None);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes.node_id("/c"), Some(3));
    }

    #[test]
    fn clear_drops_both_directions() {
        let routes = cache(8);
        routes.store(1, "/a");
        routes.store(2, "/b");
        routes.clear();
        assert!(routes.is_empty());
        assert_eq!(routes.node_id("/a"), None);
        assert_eq!(routes.route(2), None);
    }
}
