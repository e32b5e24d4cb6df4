//! Route ⇄ id resolution over one snapshot.
//!
//! A route is `"{domainRootId}/seg/seg"` when the node sits below a node that
//! carries a (non-wildcard) domain, and `"/seg/seg"` otherwise. With
//! `hide_top_level` the top-level segment is left out of prefix-less routes.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::node::{Node, ROOT_ID};
use crate::domain::snapshot::Snapshot;
use crate::domain::types::DomainAssignment;

use super::routes::RoutesCache;

/// Nodes that root a domain, keyed by content id. Wildcard domains excluded.
pub type DomainRoots = HashMap<i32, DomainAssignment>;

pub fn domain_roots(assignments: Vec<DomainAssignment>) -> DomainRoots {
    assignments
        .into_iter()
        .filter(|assignment| !assignment.is_wildcard)
        .map(|assignment| (assignment.content_id, assignment))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteLookup {
    Found(String),
    /// The computed route resolves to another node.
    Collision { route: String, conflicting_id: i32 },
    NotFound,
}

impl RouteLookup {
    /// The route string, whether or not it collides.
    pub fn route(&self) -> Option<&str> {
        match self {
            Self::Found(route) | Self::Collision { route, .. } => Some(route),
            Self::NotFound => None,
        }
    }
}

pub struct RouteResolver<'a> {
    snapshot: &'a Snapshot,
    domains: &'a DomainRoots,
    hide_top_level: bool,
    cache: Option<&'a RoutesCache>,
}

impl<'a> RouteResolver<'a> {
    pub fn new(snapshot: &'a Snapshot, domains: &'a DomainRoots, hide_top_level: bool) -> Self {
        Self {
            snapshot,
            domains,
            hide_top_level,
            cache: None,
        }
    }

    /// Read through and populate `cache`. Preview lookups never use one.
    pub fn with_cache(mut self, cache: &'a RoutesCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn get_by_route(&self, route: &str) -> Option<i32> {
        let (start, segments) = parse_route(route)?;
        let normalized = format_route(start, &segments);
        if let Some(id) = self.cache.and_then(|cache| cache.node_id(&normalized))
            && self.snapshot.contains(id)
        {
            return Some(id);
        }

        let id = self.resolve(start, &segments)?;

        // Only the route the node itself would produce goes into the cache.
        if let Some(cache) = self.cache
            && self.compute_route(id).as_deref() == Some(normalized.as_str())
        {
            cache.store(id, &normalized);
        }
        Some(id)
    }

    pub fn get_route_by_id(&self, id: i32) -> RouteLookup {
        if let Some(route) = self.cache.and_then(|cache| cache.route(id)) {
            return RouteLookup::Found(route);
        }
        let Some(route) = self.compute_route(id) else {
            return RouteLookup::NotFound;
        };

        let resolved = parse_route(&route).and_then(|(start, segments)| self.resolve(start, &segments));
        match resolved {
            Some(other) if other != id => {
                debug!(id, conflicting_id = other, route = %route, "Route collision");
                RouteLookup::Collision {
                    route,
                    conflicting_id: other,
                }
            }
            Some(_) => {
                if let Some(cache) = self.cache {
                    cache.store(id, &route);
                }
                RouteLookup::Found(route)
            }
            None => RouteLookup::Found(route),
        }
    }

    fn compute_route(&self, id: i32) -> Option<String> {
        let node = self.snapshot.get(id)?;
        let mut segments: Vec<&str> = Vec::new();
        let mut domain_root = None;
        let mut current: &Node = node;
        loop {
            if self.domains.contains_key(&current.id) {
                domain_root = Some(current.id);
                break;
            }
            segments.push(&current.url_name);
            if current.parent_id == ROOT_ID {
                break;
            }
            current = self.snapshot.get(current.parent_id)?.as_ref();
        }
        segments.reverse();

        if let Some(root) = domain_root {
            return Some(format!("{root}/{}", segments.join("/")));
        }
        if self.hide_top_level && !segments.is_empty() {
            let is_default_root = self.snapshot.root_children().first() == Some(&id);
            if segments.len() > 1 || is_default_root {
                segments.remove(0);
            }
        }
        Some(format!("/{}", segments.join("/")))
    }

    fn resolve(&self, start: Option<i32>, segments: &[String]) -> Option<i32> {
        if let Some(start) = start {
            self.snapshot.get(start)?;
            return self.walk(start, segments);
        }
        if segments.is_empty() {
            return self.snapshot.root_children().first().copied();
        }
        if !self.hide_top_level {
            return self.walk(ROOT_ID, segments);
        }
        self.snapshot
            .root_children()
            .iter()
            .find_map(|top| self.walk(*top, segments))
            .or_else(|| {
                // Top-level nodes other than the default root keep their segment.
                (segments.len() == 1)
                    .then(|| self.walk(ROOT_ID, segments))
                    .flatten()
            })
    }

    fn walk(&self, from: i32, segments: &[String]) -> Option<i32> {
        segments.iter().try_fold(from, |parent, segment| {
            self.snapshot
                .child_nodes(parent)
                .find(|child| child.url_name == *segment)
                .map(|child| child.id)
        })
    }
}

/// The normalized spelling of a parsed route, as [`RouteResolver::get_route_by_id`]
/// would produce it.
fn format_route(start: Option<i32>, segments: &[String]) -> String {
    match start {
        Some(root) => format!("{root}/{}", segments.join("/")),
        None => format!("/{}", segments.join("/")),
    }
}

/// Split a route into its optional domain root and lowercased segments.
fn parse_route(route: &str) -> Option<(Option<i32>, Vec<String>)> {
    let slash = route.find('/')?;
    let (prefix, path) = route.split_at(slash);
    let start = if prefix.is_empty() {
        None
    } else {
        Some(prefix.parse::<i32>().ok()?)
    };
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_lowercase)
        .collect();
    Some((start, segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::domain::node::fixtures::node;
    use crate::domain::types::TreeKind;

    fn named(id: i32, parent_id: i32, sort_order: i32, url_name: &str) -> Node {
        let mut node = node(id, parent_id, sort_order);
        node.url_name = url_name.to_string();
        node
    }

    fn site() -> Snapshot {
        let mut snapshot = Snapshot::new(TreeKind::Content);
        for node in [
            named(1, ROOT_ID, 0, "home"),
            named(10, 1, 0, "about"),
            named(11, 10, 0, "team"),
            named(2, ROOT_ID, 1, "other"),
            named(20, 2, 0, "contact"),
        ] {
            snapshot.append_child(node).expect("append");
        }
        snapshot
    }

    fn domain(content_id: i32, is_wildcard: bool) -> DomainAssignment {
        DomainAssignment {
            content_id,
            host: format!("site{content_id}.example"),
            is_wildcard,
        }
    }

    #[test]
    fn parse_route_splits_prefix() {
        assert_eq!(
            parse_route("12/A/b/"),
            Some((Some(12), vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(parse_route("/"), Some((None, vec![])));
        assert_eq!(parse_route("x/a"), None);
        assert_eq!(parse_route("no-slash"), None);
    }

    #[test]
    fn hidden_top_level_routes() {
        let snapshot = site();
        let domains = DomainRoots::new();
        let resolver = RouteResolver::new(&snapshot, &domains, true);

        assert_eq!(resolver.get_route_by_id(1), RouteLookup::Found("/".into()));
        assert_eq!(resolver.get_route_by_id(11), RouteLookup::Found("/about/team".into()));
        assert_eq!(resolver.get_route_by_id(2), RouteLookup::Found("/other".into()));
        assert_eq!(resolver.get_route_by_id(20), RouteLookup::Found("/contact".into()));

        assert_eq!(resolver.get_by_route("/"), Some(1));
        assert_eq!(resolver.get_by_route("/About/Team"), Some(11));
        assert_eq!(resolver.get_by_route("/other"), Some(2));
        assert_eq!(resolver.get_by_route("/contact"), Some(20));
        assert_eq!(resolver.get_by_route("/missing"), None);
    }

    #[test]
    fn visible_top_level_routes() {
        let snapshot = site();
        let domains = DomainRoots::new();
        let resolver = RouteResolver::new(&snapshot, &domains, false);

        assert_eq!(resolver.get_route_by_id(11), RouteLookup::Found("/home/about/team".into()));
        assert_eq!(resolver.get_by_route("/home/about"), Some(10));
        assert_eq!(resolver.get_by_route("/about"), None);
    }

    #[test]
    fn domain_roots_prefix_routes() {
        let snapshot = site();
        let domains = domain_roots(vec![domain(2, false), domain(1, true)]);
        assert_eq!(domains.len(), 1);
        let resolver = RouteResolver::new(&snapshot, &domains, true);

        assert_eq!(resolver.get_route_by_id(20), RouteLookup::Found("2/contact".into()));
        assert_eq!(resolver.get_route_by_id(2), RouteLookup::Found("2/".into()));
        assert_eq!(resolver.get_by_route("2/contact"), Some(20));
        assert_eq!(resolver.get_by_route("2/"), Some(2));
        assert_eq!(resolver.get_by_route("99/contact"), None);
    }

    #[test]
    fn cache_only_keeps_canonical_routes() {
        let snapshot = site();
        let domains = domain_roots(vec![domain(2, false)]);
        let cache = RoutesCache::new(&CacheConfig::default());
        let resolver = RouteResolver::new(&snapshot, &domains, true).with_cache(&cache);

        // Reachable without the domain prefix, but not its canonical route.
        assert_eq!(resolver.get_by_route("/contact"), Some(20));
        assert!(cache.route(20).is_none());

        assert_eq!(resolver.get_by_route("2/contact"), Some(20));
        assert_eq!(cache.route(20).as_deref(), Some("2/contact"));

        assert_eq!(resolver.get_by_route("/about"), Some(10));
        assert_eq!(cache.node_id("/about"), Some(10));
    }

    #[test]
    fn cache_stores_the_normalized_route() {
        let snapshot = site();
        let domains = DomainRoots::new();
        let cache = RoutesCache::new(&CacheConfig::default());
        let resolver = RouteResolver::new(&snapshot, &domains, true).with_cache(&cache);

        assert_eq!(resolver.get_by_route("/About/Team/"), Some(11));
        assert_eq!(cache.route(11).as_deref(), Some("/about/team"));
        assert_eq!(resolver.get_route_by_id(11), RouteLookup::Found("/about/team".into()));
        assert_eq!(resolver.get_by_route("/ABOUT//team"), Some(11));
    }

    #[test]
    fn prefix_of_a_node_without_domain_is_not_cached() {
        let snapshot = site();
        let domains = DomainRoots::new();
        let cache = RoutesCache::new(&CacheConfig::default());
        let resolver = RouteResolver::new(&snapshot, &domains, true).with_cache(&cache);

        assert_eq!(resolver.get_by_route("1/about"), Some(10));
        assert!(cache.is_empty());
        assert_eq!(resolver.get_route_by_id(10), RouteLookup::Found("/about".into()));
    }
}
