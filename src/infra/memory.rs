//! In-process implementation of the content read contract.
//!
//! Holds a small write-side model (nodes with a published and a draft state)
//! and serves rows exactly like the Postgres source would: ordered by
//! `(level, sort_order, id)`, with paths derived from the current parent chain.
//! Used by the integration tests and for local tooling without a database.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use pubcache_api_types::ContentRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ContentSource, RepoError, RowStream};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::node::{NodePayload, Property, ROOT_ID, child_path};
use crate::domain::types::{ContentType, DomainAssignment, TreeKind};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: TreeKind,
    key: Uuid,
    parent_id: i32,
    sort_order: i32,
    type_alias: String,
    name: String,
    url_name: Option<String>,
    properties: Vec<Property>,
    rv: i64,
    published: bool,
    draft_name: Option<String>,
    raw_payload: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<i32, MemoryNode>,
    content_types: Vec<ContentType>,
    domains: Vec<DomainAssignment>,
}

#[derive(Default)]
pub struct MemorySource {
    state: RwLock<MemoryState>,
    failing: AtomicBool,
    branch_loads: AtomicUsize,
    tree_loads: AtomicUsize,
    rebuilds: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a content type of the content tree.
    pub fn add_content_type(&self, id: i32, alias: &str) {
        self.add_content_type_of(id, alias, TreeKind::Content);
    }

    pub fn add_content_type_of(&self, id: i32, alias: &str, kind: TreeKind) {
        let mut state = rw_write(&self.state, SOURCE, "add_content_type");
        state.content_types.retain(|existing| existing.id != id);
        state.content_types.push(ContentType {
            id,
            alias: alias.to_string(),
            kind,
        });
    }

    pub fn remove_content_type(&self, id: i32) {
        rw_write(&self.state, SOURCE, "remove_content_type")
            .content_types
            .retain(|existing| existing.id != id);
    }

    /// Create or update a published content node. Updates bump its `rv`.
    pub fn upsert(&self, id: i32, parent_id: i32, sort_order: i32, type_alias: &str, name: &str) {
        self.upsert_of(TreeKind::Content, id, parent_id, sort_order, type_alias, name);
    }

    pub fn upsert_of(
        &self,
        kind: TreeKind,
        id: i32,
        parent_id: i32,
        sort_order: i32,
        type_alias: &str,
        name: &str,
    ) {
        let mut state = rw_write(&self.state, SOURCE, "upsert");
        match state.nodes.get_mut(&id) {
            Some(node) => {
                node.parent_id = parent_id;
                node.sort_order = sort_order;
                node.type_alias = type_alias.to_string();
                node.name = name.to_string();
                node.published = true;
                node.rv += 1;
            }
            None => {
                state.nodes.insert(
                    id,
                    MemoryNode {
                        kind,
                        key: Uuid::new_v4(),
                        parent_id,
                        sort_order,
                        type_alias: type_alias.to_string(),
                        name: name.to_string(),
                        url_name: None,
                        properties: vec![Property {
                            alias: "title".to_string(),
                            value: name.to_string(),
                        }],
                        rv: 1,
                        published: true,
                        draft_name: None,
                        raw_payload: None,
                    },
                );
            }
        }
    }

    /// Move a node under another parent; its descendants follow.
    pub fn move_node(&self, id: i32, parent_id: i32, sort_order: i32) {
        self.edit(id, |node| {
            node.parent_id = parent_id;
            node.sort_order = sort_order;
        });
    }

    pub fn rename(&self, id: i32, name: &str) {
        self.edit(id, |node| node.name = name.to_string());
    }

    pub fn set_url_name(&self, id: i32, url_name: &str) {
        self.edit(id, |node| node.url_name = Some(url_name.to_string()));
    }

    pub fn set_type(&self, id: i32, type_alias: &str) {
        self.edit(id, |node| node.type_alias = type_alias.to_string());
    }

    pub fn unpublish(&self, id: i32) {
        self.edit(id, |node| node.published = false);
    }

    pub fn publish(&self, id: i32) {
        self.edit(id, |node| {
            node.published = true;
            if let Some(name) = node.draft_name.take() {
                node.name = name;
            }
        });
    }

    /// Give a node an unpublished pending name, visible in preview only.
    pub fn set_draft_name(&self, id: i32, name: &str) {
        let mut state = rw_write(&self.state, SOURCE, "set_draft_name");
        if let Some(node) = state.nodes.get_mut(&id) {
            node.draft_name = Some(name.to_string());
        }
    }

    /// Serve `payload` verbatim for `id`, e.g. to simulate a broken row.
    pub fn set_raw_payload(&self, id: i32, payload: &str) {
        self.edit(id, |node| node.raw_payload = Some(payload.to_string()));
    }

    /// Delete a node and everything below it.
    pub fn remove(&self, id: i32) {
        let mut state = rw_write(&self.state, SOURCE, "remove");
        let mut doomed = vec![id];
        let mut index = 0;
        while index < doomed.len() {
            let parent = doomed[index];
            doomed.extend(
                state
                    .nodes
                    .iter()
                    .filter(|(_, node)| node.parent_id == parent)
                    .map(|(child, _)| *child),
            );
            index += 1;
        }
        for id in doomed {
            state.nodes.remove(&id);
        }
    }

    pub fn add_domain(&self, content_id: i32, host: &str) {
        rw_write(&self.state, SOURCE, "add_domain")
            .domains
            .push(DomainAssignment {
                content_id,
                host: host.to_string(),
                is_wildcard: host.starts_with('*'),
            });
    }

    pub fn clear_domains(&self) {
        rw_write(&self.state, SOURCE, "clear_domains").domains.clear();
    }

    /// Make every subsequent call fail with a timeout until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn branch_loads(&self) -> usize {
        self.branch_loads.load(Ordering::Relaxed)
    }

    pub fn tree_loads(&self) -> usize {
        self.tree_loads.load(Ordering::Relaxed)
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::Relaxed)
    }

    fn edit(&self, id: i32, apply: impl FnOnce(&mut MemoryNode)) {
        let mut state = rw_write(&self.state, SOURCE, "edit");
        if let Some(node) = state.nodes.get_mut(&id) {
            apply(node);
            node.rv += 1;
        }
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }
}

impl MemoryState {
    /// Ancestors-or-self ids from the top, or `None` when the chain is broken.
    fn chain(&self, id: i32) -> Option<Vec<i32>> {
        let mut chain = vec![id];
        let mut current = self.nodes.get(&id)?.parent_id;
        while current != ROOT_ID {
            if chain.contains(&current) || chain.len() > self.nodes.len() {
                return None;
            }
            chain.push(current);
            current = self.nodes.get(&current)?.parent_id;
        }
        chain.reverse();
        Some(chain)
    }

    fn path(chain: &[i32]) -> String {
        chain
            .iter()
            .fold(ROOT_ID.to_string(), |path, id| child_path(&path, *id))
    }

    fn row(&self, id: i32, draft: bool) -> Result<Option<ContentRow>, RepoError> {
        let (Some(node), Some(chain)) = (self.nodes.get(&id), self.chain(id)) else {
            return Ok(None);
        };
        let name = match (&node.draft_name, draft) {
            (Some(pending), true) => pending.clone(),
            _ => node.name.clone(),
        };
        let payload = match &node.raw_payload {
            Some(raw) => raw.clone(),
            None => serde_json::to_string(&NodePayload {
                key: node.key,
                type_alias: node.type_alias.clone(),
                name,
                url_name: node.url_name.clone(),
                template_id: None,
                create_date: OffsetDateTime::UNIX_EPOCH,
                update_date: OffsetDateTime::UNIX_EPOCH,
                creator_id: 0,
                writer_id: 0,
                properties: node.properties.clone(),
            })
            .map_err(|err| RepoError::Payload {
                message: err.to_string(),
            })?,
        };
        Ok(Some(ContentRow {
            id,
            parent_id: node.parent_id,
            sort_order: node.sort_order,
            level: i32::try_from(chain.len()).unwrap_or(i32::MAX),
            path: Self::path(&chain),
            payload,
            rv: node.rv,
            published: node.published && node.draft_name.is_none(),
        }))
    }

    /// Rows of the ids accepted by `filter`, in read-contract order.
    fn rows(
        &self,
        draft: bool,
        filter: impl Fn(i32, &MemoryNode) -> bool,
    ) -> Result<Vec<ContentRow>, RepoError> {
        let mut rows = Vec::new();
        for (id, node) in &self.nodes {
            if filter(*id, node)
                && let Some(row) = self.row(*id, draft)?
            {
                rows.push(row);
            }
        }
        rows.sort_by_key(|row| (row.level, row.sort_order, row.id));
        Ok(rows)
    }

    fn is_below(&self, id: i32, ancestor: i32) -> bool {
        self.chain(id)
            .is_some_and(|chain| chain.iter().rev().skip(1).any(|id| *id == ancestor))
    }

    fn alias_ids(&self, content_type_ids: &[i32]) -> Vec<String> {
        self.content_types
            .iter()
            .filter(|content_type| content_type_ids.contains(&content_type.id))
            .map(|content_type| content_type.alias.clone())
            .collect()
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    fn stream_tree(&self, kind: TreeKind) -> RowStream<'_> {
        self.tree_loads.fetch_add(1, Ordering::Relaxed);
        let rows = self.check().and_then(|()| {
            rw_read(&self.state, SOURCE, "stream_tree")
                .rows(false, |_, node| node.kind == kind && node.published)
        });
        match rows {
            Ok(rows) => Box::pin(futures::stream::iter(rows.into_iter().map(Ok))),
            Err(err) => Box::pin(futures::stream::iter([Err(err)])),
        }
    }

    async fn load_branch(&self, kind: TreeKind, id: i32) -> Result<Vec<ContentRow>, RepoError> {
        self.check()?;
        self.branch_loads.fetch_add(1, Ordering::Relaxed);
        let state = rw_read(&self.state, SOURCE, "load_branch");
        if !state
            .nodes
            .get(&id)
            .is_some_and(|node| node.kind == kind && node.published)
        {
            return Ok(Vec::new());
        }
        state.rows(false, |candidate, node| {
            node.kind == kind
                && node.published
                && (candidate == id || state.is_below(candidate, id))
        })
    }

    async fn load_by_content_types(
        &self,
        kind: TreeKind,
        content_type_ids: &[i32],
    ) -> Result<Vec<ContentRow>, RepoError> {
        self.check()?;
        let state = rw_read(&self.state, SOURCE, "load_by_content_types");
        let aliases = state.alias_ids(content_type_ids);
        state.rows(false, |_, node| {
            node.kind == kind && node.published && aliases.contains(&node.type_alias)
        })
    }

    async fn load_preview(
        &self,
        id: i32,
        include_descendants: bool,
    ) -> Result<Vec<ContentRow>, RepoError> {
        self.check()?;
        let state = rw_read(&self.state, SOURCE, "load_preview");
        let Some(chain) = state.chain(id) else {
            return Ok(Vec::new());
        };
        state.rows(true, |candidate, _| {
            chain.contains(&candidate) || (include_descendants && state.is_below(candidate, id))
        })
    }

    async fn content_types(&self, kind: TreeKind) -> Result<Vec<ContentType>, RepoError> {
        self.check()?;
        Ok(rw_read(&self.state, SOURCE, "content_types")
            .content_types
            .iter()
            .filter(|content_type| content_type.kind == kind)
            .cloned()
            .collect())
    }

    async fn domain_roots(&self) -> Result<Vec<DomainAssignment>, RepoError> {
        self.check()?;
        Ok(rw_read(&self.state, SOURCE, "domain_roots").domains.clone())
    }

    async fn rebuild(
        &self,
        kind: TreeKind,
        group_size: usize,
        content_type_ids: Option<&[i32]>,
    ) -> Result<u64, RepoError> {
        self.check()?;
        if group_size == 0 {
            return Err(RepoError::InvalidInput {
                message: "group size must be positive".to_string(),
            });
        }
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        let state = rw_read(&self.state, SOURCE, "rebuild");
        let aliases = content_type_ids.map(|ids| state.alias_ids(ids));
        let written = state
            .nodes
            .values()
            .filter(|node| node.kind == kind && node.published)
            .filter(|node| {
                aliases
                    .as_ref()
                    .is_none_or(|aliases| aliases.contains(&node.type_alias))
            })
            .count();
        Ok(written as u64)
    }
}
