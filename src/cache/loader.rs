//! Composes trees from ordered source rows.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use pubcache_api_types::ContentRow;
use tracing::{debug, instrument, warn};

use crate::application::repos::ContentSource;
use crate::domain::node::{Node, ROOT_ID};
use crate::domain::snapshot::Snapshot;
use crate::domain::types::TreeKind;

use super::error::CacheError;

/// Counters collected while composing a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Rows whose parent never arrived.
    pub orphaned: usize,
    /// Rows whose payload could not be decoded.
    pub undecodable: usize,
}

pub struct DatabaseLoader {
    source: Arc<dyn ContentSource>,
}

impl DatabaseLoader {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self { source }
    }

    /// Stream every published row of `kind` and compose the tree.
    #[instrument(skip(self))]
    pub async fn load_tree(&self, kind: TreeKind) -> Result<(Snapshot, LoadReport), CacheError> {
        let mut rows = self.source.stream_tree(kind);
        let mut composer = Composer::default();
        while let Some(row) = rows.next().await {
            composer.push(&row?);
        }
        let (snapshot, report) = composer.finish(kind);
        debug!(
            kind = %kind,
            loaded = report.loaded,
            orphaned = report.orphaned,
            "Composed tree from source rows"
        );
        Ok((snapshot, report))
    }

    /// Decoded rows of a node and its descendants, parents first. Empty when
    /// the node is not published.
    #[instrument(skip(self))]
    pub async fn load_branch(
        &self,
        kind: TreeKind,
        id: i32,
    ) -> Result<(Vec<Node>, LoadReport), CacheError> {
        let rows = self.source.load_branch(kind, id).await?;
        let nodes = decode_rows(&rows);
        let report = LoadReport {
            loaded: nodes.len(),
            orphaned: 0,
            undecodable: rows.len() - nodes.len(),
        };
        Ok((nodes, report))
    }

    /// Compose a tree from rows already in memory.
    pub fn compose(kind: TreeKind, rows: &[ContentRow]) -> (Snapshot, LoadReport) {
        let mut composer = Composer::default();
        for row in rows {
            composer.push(row);
        }
        composer.finish(kind)
    }
}

/// Decode rows, dropping (and logging) the ones with broken payloads.
pub(crate) fn decode_rows(rows: &[ContentRow]) -> Vec<Node> {
    rows.iter()
        .filter_map(|row| match Node::from_row(row) {
            Ok(node) => Some(node),
            Err(err) => {
                warn!(id = row.id, error = %err, "Skipping undecodable row");
                None
            }
        })
        .collect()
}

/// Builds a `parent id → children` index, then appends children breadth-first
/// from the conceptual root.
#[derive(Default)]
struct Composer {
    by_parent: HashMap<i32, Vec<Node>>,
    received: usize,
    undecodable: usize,
}

impl Composer {
    fn push(&mut self, row: &ContentRow) {
        self.received += 1;
        match Node::from_row(row) {
            Ok(node) => self.by_parent.entry(node.parent_id).or_default().push(node),
            Err(err) => {
                self.undecodable += 1;
                warn!(id = row.id, error = %err, "Skipping undecodable row");
            }
        }
    }

    fn finish(mut self, kind: TreeKind) -> (Snapshot, LoadReport) {
        let mut snapshot = Snapshot::new(kind);
        let mut queue = VecDeque::from([ROOT_ID]);
        let mut loaded = 0usize;

        while let Some(parent_id) = queue.pop_front() {
            let Some(children) = self.by_parent.remove(&parent_id) else {
                continue;
            };
            for child in children {
                let id = child.id;
                match snapshot.append_child(child) {
                    Ok(()) => {
                        loaded += 1;
                        queue.push_back(id);
                    }
                    Err(err) => warn!(id, error = %err, "Skipping row that does not fit the tree"),
                }
            }
        }

        let orphaned: usize = self.by_parent.values().map(Vec::len).sum();
        if orphaned > 0 {
            warn!(orphaned, "Rows reference parents that are not published");
        }

        let report = LoadReport {
            loaded,
            orphaned,
            undecodable: self.undecodable,
        };
        debug_assert!(self.received >= loaded);
        (snapshot, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::fixtures::payload_json;
    use crate::infra::memory::MemorySource;

    fn row(id: i32, parent_id: i32, level: i32, sort_order: i32) -> ContentRow {
        ContentRow {
            id,
            parent_id,
            sort_order,
            level,
            path: String::new(),
            payload: payload_json("page", &format!("Node {id}")),
            rv: 1,
            published: true,
        }
    }

    #[test]
    fn compose_builds_ordered_tree() {
        let rows = vec![
            row(1, ROOT_ID, 1, 0),
            row(2, ROOT_ID, 1, 1),
            row(10, 1, 2, 0),
            row(11, 1, 2, 1),
            row(20, 2, 2, 0),
            row(100, 10, 3, 0),
        ];
        let (snapshot, report) = DatabaseLoader::compose(TreeKind::Content, &rows);

        assert_eq!(report.loaded, 6);
        assert_eq!(report.orphaned, 0);
        assert_eq!(snapshot.root_children(), &[1, 2]);
        assert_eq!(snapshot.children(1), &[10, 11]);
        assert_eq!(snapshot.get(100).expect("present").path, "-1,1,10,100");
        snapshot.check_invariants().expect("invariants hold");
    }

    #[test]
    fn orphans_and_bad_payloads_are_skipped() {
        let mut broken = row(3, ROOT_ID, 1, 2);
        broken.payload = "nope".to_string();
        let rows = vec![row(1, ROOT_ID, 1, 0), broken, row(30, 3, 2, 0), row(50, 42, 2, 0)];

        let (snapshot, report) = DatabaseLoader::compose(TreeKind::Content, &rows);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(report.undecodable, 1);
        assert_eq!(report.orphaned, 2);
    }

    #[tokio::test]
    async fn load_branch_reports_undecodable_rows() {
        let source = Arc::new(MemorySource::new());
        source.add_content_type(1, "page");
        source.upsert(1, ROOT_ID, 0, "page", "Home");
        source.upsert(10, 1, 0, "page", "About");
        source.upsert(11, 1, 1, "page", "Blog");
        source.set_raw_payload(11, "nope");
        let loader = DatabaseLoader::new(source as Arc<dyn ContentSource>);

        let (nodes, report) = loader.load_branch(TreeKind::Content, 1).await.expect("branch");
        let ids: Vec<i32> = nodes.iter().map(|node| node.id).collect();
        assert_eq!(ids, vec![1, 10]);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.undecodable, 1);

        let (missing, report) = loader.load_branch(TreeKind::Content, 404).await.expect("branch");
        assert!(missing.is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn empty_source_gives_empty_tree() {
        let (snapshot, report) = DatabaseLoader::compose(TreeKind::Media, &[]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.kind(), TreeKind::Media);
        assert_eq!(report, LoadReport::default());
    }
}
