//! Applies change descriptors to a working copy of the snapshot.
//!
//! Each descriptor is handled on its own: a descriptor that cannot be applied
//! (unknown parent, stale row) is logged and skipped, the rest of the batch
//! still lands in the same commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use pubcache_api_types::{ChangeKind, ChangePayload};
use tracing::{debug, warn};

use crate::domain::error::DomainError;
use crate::domain::node::{Node, ROOT_ID};
use crate::domain::snapshot::Snapshot;
use crate::domain::types::TreeKind;

use super::content_types::ContentTypeCache;
use super::error::CacheError;
use super::loader::DatabaseLoader;
use super::snapshot_lock::Scope;

/// What a batch did to the working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// A `RefreshAll` descriptor was seen; nothing else was applied.
    pub reload_all: bool,
    pub published_changed: bool,
    /// Descriptors that were logged and ignored.
    pub skipped: usize,
    /// Type aliases written to the tree that no known content type declares.
    pub unresolved_aliases: BTreeSet<String>,
}

pub struct ChangeApplier<'a> {
    loader: &'a DatabaseLoader,
    content_types: &'a ContentTypeCache,
    kind: TreeKind,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(
        loader: &'a DatabaseLoader,
        content_types: &'a ContentTypeCache,
        kind: TreeKind,
    ) -> Self {
        Self {
            loader,
            content_types,
            kind,
        }
    }

    /// Apply `payloads` through `scope`. The caller commits the scope when
    /// [`ApplyReport::published_changed`] is set.
    pub async fn apply(
        &self,
        scope: &mut Scope<'_>,
        payloads: &[ChangePayload],
    ) -> Result<ApplyReport, CacheError> {
        let mut report = ApplyReport::default();
        if payloads
            .iter()
            .any(|payload| payload.change_kind.has(ChangeKind::REFRESH_ALL))
        {
            report.reload_all = true;
            return Ok(report);
        }

        for payload in payloads {
            let kind = payload.change_kind;
            if kind.has(ChangeKind::REMOVE) {
                if self.remove(scope, payload.id).await {
                    report.published_changed = true;
                }
                continue;
            }
            if kind.has_none(ChangeKind::REFRESH_NODE | ChangeKind::REFRESH_BRANCH) {
                continue;
            }
            match self.refresh(scope, payload.id, kind, &mut report).await? {
                Refresh::Changed => report.published_changed = true,
                Refresh::Unchanged => {}
                Refresh::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn remove(&self, scope: &mut Scope<'_>, id: i32) -> bool {
        if !scope.view(|snapshot| snapshot.contains(id)) {
            return false;
        }
        let removed = scope.writer().await.detach(id);
        debug!(id, removed = removed.as_ref().map_or(0, Vec::len), "Removed node");
        removed.is_some()
    }

    async fn refresh(
        &self,
        scope: &mut Scope<'_>,
        id: i32,
        kind: ChangeKind,
        report: &mut ApplyReport,
    ) -> Result<Refresh, CacheError> {
        let (mut nodes, loaded) = self.loader.load_branch(self.kind, id).await?;
        let Some(first) = nodes.first() else {
            if loaded.undecodable > 0 {
                return Ok(Refresh::Skipped);
            }
            // No longer published.
            return Ok(if self.remove(scope, id).await {
                Refresh::Changed
            } else {
                Refresh::Unchanged
            });
        };
        if first.id != id {
            warn!(id, row_id = first.id, "Branch rows do not start at the requested node");
            return Ok(Refresh::Skipped);
        }
        let fresh = nodes.remove(0);

        // Plan against the published tree, then again on the working copy:
        // another batch may have committed while this one waited for the writer.
        match scope.view(|snapshot| plan_refresh(snapshot, &fresh, kind)) {
            Plan::Unchanged => return Ok(Refresh::Unchanged),
            Plan::Unplaceable if !scope.is_enlisted() => {
                warn!(id, parent_id = fresh.parent_id, "Parent is not in the tree, skipping");
                return Ok(Refresh::Skipped);
            }
            _ => {}
        }
        let writer = scope.writer().await;
        match plan_refresh(writer, &fresh, kind) {
            Plan::Unchanged => Ok(Refresh::Unchanged),
            Plan::Unplaceable => {
                warn!(id, parent_id = fresh.parent_id, "Parent is not in the tree, skipping");
                Ok(Refresh::Skipped)
            }
            Plan::Patch => {
                self.note_alias(&fresh, report);
                if let Err(err) = add_or_update(writer, fresh) {
                    warn!(id, error = %err, "Skipping node that does not fit the tree");
                    return Ok(Refresh::Skipped);
                }
                Ok(Refresh::Changed)
            }
            Plan::Branch => {
                self.note_alias(&fresh, report);
                writer.detach(id);
                if let Err(err) = writer.insert_sorted(fresh) {
                    warn!(id, error = %err, "Skipping node that does not fit the tree");
                    return Ok(Refresh::Skipped);
                }
                for node in nodes {
                    let node_id = node.id;
                    self.note_alias(&node, report);
                    // A descendant may still sit at its previous location.
                    if writer.contains(node_id) {
                        writer.detach(node_id);
                    }
                    if let Err(err) = writer.append_child(node) {
                        warn!(id = node_id, error = %err, "Skipping descendant row");
                    }
                }
                Ok(Refresh::Changed)
            }
        }
    }

    fn note_alias(&self, node: &Node, report: &mut ApplyReport) {
        if self.content_types.resolve(&node.type_alias).is_none() {
            report.unresolved_aliases.insert(node.type_alias.clone());
        }
    }
}

enum Refresh {
    Changed,
    Unchanged,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Unchanged,
    /// The parent is missing or lies inside the node's own subtree.
    Unplaceable,
    /// Same place in the tree, new content.
    Patch,
    /// (Re)insert the node together with its descendants.
    Branch,
}

fn plan_refresh(snapshot: &Snapshot, fresh: &Node, kind: ChangeKind) -> Plan {
    let branch = match snapshot.get(fresh.id) {
        None => true,
        Some(current) => {
            let moved = kind.has(ChangeKind::REFRESH_BRANCH)
                || current.parent_id != fresh.parent_id
                || current.path != fresh.path;
            if !moved && current.rv == fresh.rv {
                return Plan::Unchanged;
            }
            moved
        }
    };
    if !branch {
        Plan::Patch
    } else if parent_accepts(snapshot, fresh.id, fresh.parent_id) {
        Plan::Branch
    } else {
        Plan::Unplaceable
    }
}

/// True when `parent_id` can take `id` as a child: the parent exists and is
/// not inside the subtree of `id`.
fn parent_accepts(snapshot: &Snapshot, id: i32, parent_id: i32) -> bool {
    if parent_id == ROOT_ID {
        return true;
    }
    match snapshot.get(parent_id) {
        Some(parent) => parent.id != id && !parent.path_ids().contains(&id),
        None => false,
    }
}

/// Insert `node`, update it in place, or move it with its descendants,
/// depending on what the tree currently holds for its id.
///
/// An update that keeps the type alias patches the existing record; a type
/// change swaps the record while keeping its children.
pub(crate) fn add_or_update(snapshot: &mut Snapshot, mut node: Node) -> Result<(), DomainError> {
    let id = node.id;
    let Some(existing) = snapshot.get(id).cloned() else {
        return snapshot.insert_sorted(node);
    };

    if existing.parent_id == node.parent_id {
        node.path.clone_from(&existing.path);
        node.level = existing.level;
        if existing.type_alias != node.type_alias {
            return snapshot.replace_in_place(node);
        }
        let reorder = existing.sort_order != node.sort_order;
        snapshot.ensure_schema(&node.type_alias);
        if let Some(target) = snapshot.get_mut(id) {
            target.patch_from(&node);
        }
        if reorder {
            snapshot.reposition(id)?;
        }
        return Ok(());
    }

    if !parent_accepts(snapshot, id, node.parent_id) {
        return Err(DomainError::MissingParent {
            id,
            parent_id: node.parent_id,
        });
    }
    let removed = snapshot.detach(id).unwrap_or_default();
    snapshot.insert_sorted(node)?;
    for descendant in removed.into_iter().skip(1) {
        snapshot.append_child(Arc::unwrap_or_clone(descendant))?;
    }
    Ok(())
}
