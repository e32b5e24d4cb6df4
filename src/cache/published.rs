//! Request-scoped read API over the published tree.
//!
//! A [`PublishedContentCache`] captures the published snapshot once, so every
//! lookup made through it sees the same tree even while writers commit.

use std::sync::Arc;

use crate::domain::node::{Node, ROOT_ID};
use crate::domain::snapshot::Snapshot;
use crate::domain::types::ContentType;

use super::error::CacheError;
use super::resolver::{DomainRoots, RouteLookup, RouteResolver};
use super::store::XmlTreeStore;

/// A node together with its resolved content type.
#[derive(Debug, Clone)]
pub struct PublishedContent {
    pub node: Arc<Node>,
    /// `None` when the alias is not (yet) known; a reload has been scheduled.
    pub content_type: Option<ContentType>,
}

impl PublishedContent {
    pub fn id(&self) -> i32 {
        self.node.id
    }
}

pub struct PublishedContentCache {
    store: Arc<XmlTreeStore>,
    published: Arc<Snapshot>,
    domains: Arc<DomainRoots>,
    preview: Option<Arc<Snapshot>>,
}

impl PublishedContentCache {
    pub fn new(store: Arc<XmlTreeStore>) -> Self {
        let published = store.snapshot();
        let domains = store.domains();
        Self {
            store,
            published,
            domains,
            preview: None,
        }
    }

    /// Same as [`new`](Self::new), with a preview overlay for `content_id`
    /// used by every `preview = true` lookup.
    pub async fn with_preview(
        store: Arc<XmlTreeStore>,
        content_id: i32,
        include_descendants: bool,
    ) -> Result<Self, CacheError> {
        let preview = store
            .preview_snapshot(content_id, include_descendants)
            .await?;
        let mut cache = Self::new(store);
        cache.preview = Some(preview);
        Ok(cache)
    }

    pub fn get_by_id(&self, preview: bool, id: i32) -> Option<PublishedContent> {
        let snapshot = self.tree(preview);
        snapshot.get(id).map(|node| self.content(node))
    }

    pub fn get_by_route(&self, preview: bool, route: &str) -> Option<PublishedContent> {
        let id = self.resolver(preview).get_by_route(route)?;
        self.get_by_id(preview, id)
    }

    pub fn get_route_by_id(&self, preview: bool, id: i32) -> RouteLookup {
        self.resolver(preview).get_route_by_id(id)
    }

    pub fn get_at_root(&self, preview: bool) -> Vec<PublishedContent> {
        self.children(preview, ROOT_ID)
    }

    pub fn children(&self, preview: bool, id: i32) -> Vec<PublishedContent> {
        self.tree(preview)
            .child_nodes(id)
            .map(|node| self.content(node))
            .collect()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, preview: bool, id: i32) -> Vec<PublishedContent> {
        self.tree(preview)
            .ancestors(id)
            .into_iter()
            .map(|node| self.content(node))
            .collect()
    }

    pub fn descendants(&self, preview: bool, id: i32) -> Vec<PublishedContent> {
        self.tree(preview)
            .descendants(id)
            .into_iter()
            .map(|node| self.content(node))
            .collect()
    }

    pub fn has_content(&self, preview: bool) -> bool {
        !self.tree(preview).is_empty()
    }

    fn tree(&self, preview: bool) -> &Snapshot {
        match (&self.preview, preview) {
            (Some(overlay), true) => overlay.as_ref(),
            _ => self.published.as_ref(),
        }
    }

    fn resolver(&self, preview: bool) -> RouteResolver<'_> {
        let hide_top_level = self.store.config().hide_top_level_node_from_path;
        let resolver = RouteResolver::new(self.tree(preview), &self.domains, hide_top_level);
        // Routes computed against a superseded tree must not reach the cache.
        let current = Arc::ptr_eq(&self.published, &self.store.lock().read());
        if preview || !current {
            resolver
        } else {
            resolver.with_cache(self.store.routes())
        }
    }

    fn content(&self, node: &Arc<Node>) -> PublishedContent {
        PublishedContent {
            node: Arc::clone(node),
            content_type: self.store.content_type(&node.type_alias),
        }
    }
}
