//! Id-indexed arena holding one published tree.
//!
//! A [`Snapshot`] is cheap to clone (node records are shared behind `Arc`)
//! and is treated as immutable once published; writers clone it, patch the
//! clone with [`Arc::make_mut`] and publish the result.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::error::DomainError;
use super::node::{Node, ROOT_ID, child_path};
use super::types::TreeKind;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    kind: TreeKind,
    nodes: HashMap<i32, Arc<Node>>,
    roots: Vec<i32>,
    schema: BTreeSet<String>,
}

impl Snapshot {
    pub fn new(kind: TreeKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: i32) -> Option<&Arc<Node>> {
        self.nodes.get(&id)
    }

    pub fn root_children(&self) -> &[i32] {
        &self.roots
    }

    /// Ordered child ids of `id`; [`ROOT_ID`] yields the top-level nodes.
    pub fn children(&self, id: i32) -> &[i32] {
        if id == ROOT_ID {
            return &self.roots;
        }
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn child_nodes(&self, id: i32) -> impl Iterator<Item = &Arc<Node>> + '_ {
        self.children(id)
            .iter()
            .filter_map(move |child| self.nodes.get(child))
    }

    /// Element type aliases declared by this tree.
    pub fn schema(&self) -> impl Iterator<Item = &str> + '_ {
        self.schema.iter().map(String::as_str)
    }

    pub fn has_schema(&self, alias: &str) -> bool {
        self.schema.contains(alias)
    }

    /// Declare an element type; returns true when it was not yet declared.
    pub fn ensure_schema(&mut self, alias: &str) -> bool {
        if self.schema.contains(alias) {
            return false;
        }
        self.schema.insert(alias.to_string());
        true
    }

    /// Mutable access to a node, cloning the shared record first if needed.
    pub fn get_mut(&mut self, id: i32) -> Option<&mut Node> {
        self.nodes.get_mut(&id).map(Arc::make_mut)
    }

    /// Insert a detached node under its parent, placing it among its
    /// siblings by `(sort_order, id)` without resorting the sibling list.
    /// `path` and `level` are recomputed from the parent.
    pub fn insert_sorted(&mut self, mut node: Node) -> Result<(), DomainError> {
        self.prepare(&mut node)?;
        let id = node.id;
        let key = node.sort_key();
        let parent_id = node.parent_id;
        node.children.clear();
        self.ensure_schema(&node.type_alias);
        self.nodes.insert(id, Arc::new(node));

        let index = self.insertion_index(parent_id, key);
        self.siblings_mut(parent_id)?.insert(index, id);
        Ok(())
    }

    /// Append a node after its last sibling. Callers that feed rows ordered by
    /// `(level, sort_order)` pay no search cost; out-of-order input falls back
    /// to sorted insertion.
    pub fn append_child(&mut self, mut node: Node) -> Result<(), DomainError> {
        let parent_id = node.parent_id;
        let last_key = self
            .children(parent_id)
            .last()
            .and_then(|last| self.nodes.get(last))
            .map(|last| last.sort_key());
        if last_key.is_some_and(|last| last > node.sort_key()) {
            return self.insert_sorted(node);
        }

        self.prepare(&mut node)?;
        let id = node.id;
        node.children.clear();
        self.ensure_schema(&node.type_alias);
        self.nodes.insert(id, Arc::new(node));
        self.siblings_mut(parent_id)?.push(id);
        Ok(())
    }

    /// Remove `id` and its whole subtree. Returns the removed records in
    /// document order, or `None` when the id is absent.
    pub fn detach(&mut self, id: i32) -> Option<Vec<Arc<Node>>> {
        let parent_id = self.nodes.get(&id)?.parent_id;

        if parent_id == ROOT_ID {
            self.roots.retain(|child| *child != id);
        } else if let Some(parent) = self.nodes.get_mut(&parent_id) {
            Arc::make_mut(parent).children.retain(|child| *child != id);
        }

        let order = self.subtree_ids(id);
        Some(
            order
                .into_iter()
                .filter_map(|removed| self.nodes.remove(&removed))
                .collect(),
        )
    }

    /// Swap the record of an existing node for `node`, keeping the current
    /// children and parent. The node is repositioned among its siblings if its
    /// sort order changed.
    pub fn replace_in_place(&mut self, mut node: Node) -> Result<(), DomainError> {
        let existing = self
            .nodes
            .get(&node.id)
            .ok_or_else(|| DomainError::not_found(node.id))?;
        node.children = existing.children.clone();
        node.parent_id = existing.parent_id;
        node.path = existing.path.clone();
        node.level = existing.level;
        let moved = existing.sort_order != node.sort_order;
        let id = node.id;
        self.ensure_schema(&node.type_alias);
        self.nodes.insert(id, Arc::new(node));
        if moved {
            self.reposition(id)?;
        }
        Ok(())
    }

    /// Move `id` to the slot matching its current sort order among its siblings.
    pub fn reposition(&mut self, id: i32) -> Result<(), DomainError> {
        let node = self.nodes.get(&id).ok_or_else(|| DomainError::not_found(id))?;
        let parent_id = node.parent_id;
        let key = node.sort_key();

        self.siblings_mut(parent_id)?.retain(|sibling| *sibling != id);
        let index = self.insertion_index(parent_id, key);
        self.siblings_mut(parent_id)?.insert(index, id);
        Ok(())
    }

    /// Ancestors of `id`, nearest first (the node itself excluded).
    pub fn ancestors(&self, id: i32) -> Vec<&Arc<Node>> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id).map(|node| node.parent_id);
        while let Some(parent_id) = current {
            match self.nodes.get(&parent_id) {
                Some(parent) => {
                    out.push(parent);
                    current = Some(parent.parent_id);
                }
                None => break,
            }
        }
        out
    }

    /// Descendants of `id` in document order (the node itself excluded).
    pub fn descendants(&self, id: i32) -> Vec<&Arc<Node>> {
        let mut out = Vec::new();
        let mut stack: Vec<i32> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(node);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every node, parents before children and siblings in order.
    pub fn iter_document_order(&self) -> Vec<&Arc<Node>> {
        self.descendants(ROOT_ID)
    }

    /// Verify that ids, parent links, paths, levels and sibling order agree.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let mut seen = 0usize;
        let mut stack: Vec<(i32, String, i32)> = vec![(ROOT_ID, ROOT_ID.to_string(), 0)];

        while let Some((parent_id, parent_path, parent_level)) = stack.pop() {
            let mut previous: Option<(i32, i32)> = None;
            for child_id in self.children(parent_id) {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    DomainError::invariant(format!(
                        "child {child_id} of {parent_id} missing from the arena"
                    ))
                })?;
                if child.parent_id != parent_id {
                    return Err(DomainError::invariant(format!(
                        "node {child_id} lists parent {} but hangs under {parent_id}",
                        child.parent_id
                    )));
                }
                let expected_path = child_path(&parent_path, child.id);
                if child.path != expected_path {
                    return Err(DomainError::invariant(format!(
                        "node {child_id} has path `{}`, expected `{expected_path}`",
                        child.path
                    )));
                }
                if child.level != parent_level + 1 {
                    return Err(DomainError::invariant(format!(
                        "node {child_id} has level {}, expected {}",
                        child.level,
                        parent_level + 1
                    )));
                }
                if let Some(previous) = previous
                    && previous >= child.sort_key()
                {
                    return Err(DomainError::invariant(format!(
                        "children of {parent_id} are not strictly ordered at node {child_id}"
                    )));
                }
                previous = Some(child.sort_key());
                seen += 1;
                stack.push((child.id, child.path.clone(), child.level));
            }
        }

        if seen != self.nodes.len() {
            return Err(DomainError::invariant(format!(
                "{} nodes are not reachable from the root",
                self.nodes.len().saturating_sub(seen)
            )));
        }
        Ok(())
    }

    fn prepare(&self, node: &mut Node) -> Result<(), DomainError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DomainError::DuplicateId { id: node.id });
        }
        if node.id == ROOT_ID {
            return Err(DomainError::validation("the root id cannot be stored"));
        }
        if node.parent_id == ROOT_ID {
            node.path = child_path(&ROOT_ID.to_string(), node.id);
            node.level = 1;
            return Ok(());
        }
        let parent = self
            .nodes
            .get(&node.parent_id)
            .ok_or(DomainError::MissingParent {
                id: node.id,
                parent_id: node.parent_id,
            })?;
        node.path = child_path(&parent.path, node.id);
        node.level = parent.level + 1;
        Ok(())
    }

    fn insertion_index(&self, parent_id: i32, key: (i32, i32)) -> usize {
        self.children(parent_id).partition_point(|sibling| {
            self.nodes
                .get(sibling)
                .is_some_and(|existing| existing.sort_key() < key)
        })
    }

    fn siblings_mut(&mut self, parent_id: i32) -> Result<&mut Vec<i32>, DomainError> {
        if parent_id == ROOT_ID {
            return Ok(&mut self.roots);
        }
        self.nodes
            .get_mut(&parent_id)
            .map(|parent| &mut Arc::make_mut(parent).children)
            .ok_or_else(|| DomainError::not_found(parent_id))
    }

    fn subtree_ids(&self, id: i32) -> Vec<i32> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(&next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}
