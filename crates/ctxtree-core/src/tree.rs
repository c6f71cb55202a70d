//! Arena-backed context tree with a movable head cursor.
//!
//! Nodes live in a slot vector addressed by generational [`NodeId`]s. The
//! root owns every live slot through `children` links; `head` is a plain id
//! and never owns anything. Freed slots bump their generation, so an id that
//! pointed into a pruned subtree can never resolve to a later node.
//!
//! Invariants held between calls:
//! - every live slot is reachable from `root` exactly once
//! - `parent` links mirror `children` links
//! - `head` is a live slot

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Result, TreeError};
use crate::hash::ContentHash;
use crate::node::{
    flag_set, ContextNode, Metadata, NodeContent, LABEL_KEY, PRUNED_KEY, RENAMED_KEY,
    REPLACED_KEY,
};
use crate::render::{self, StructureOptions};

/// Stable handle to a node inside one [`ContextTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    content: NodeContent,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// The agent's working history: an owned tree of [`NodeContent`] plus a
/// non-owning head cursor.
#[derive(Debug, Clone)]
pub struct ContextTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    head: NodeId,
}

impl ContextTree {
    /// Build a tree from `root` (and any children it already owns).
    /// The head starts at the root.
    pub fn new(root: ContextNode) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            head: NodeId {
                index: 0,
                generation: 0,
            },
        };
        let root_id = tree.attach(None, root);
        tree.root = root_id;
        tree.head = root_id;
        debug!(event = "tree.created", root = %tree.hash_of(root_id), nodes = tree.len());
        tree.trace_structure();
        tree
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn root_node(&self) -> TreeNode<'_> {
        self.view(self.root)
    }

    pub fn head_node(&self) -> TreeNode<'_> {
        self.view(self.head)
    }

    /// Resolve `id` to a read view; `None` for ids freed by a prune.
    pub fn get(&self, id: NodeId) -> Option<TreeNode<'_>> {
        self.entry(id).map(|entry| TreeNode {
            tree: self,
            id,
            entry,
        })
    }

    pub fn contains_id(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Pre-order traversal from the root, yielding `(id, depth)`.
    pub fn walk(&self) -> Preorder<'_> {
        self.walk_from(self.root)
    }

    /// Pre-order traversal of the subtree under `start` (inclusive).
    /// Depths are relative to `start`.
    pub fn walk_from(&self, start: NodeId) -> Preorder<'_> {
        let stack = if self.contains_id(start) {
            vec![(start, 0)]
        } else {
            Vec::new()
        };
        Preorder { tree: self, stack }
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        self.walk().map(|(id, _)| id).collect()
    }

    /// First node in pre-order whose hash equals `hash`.
    pub fn find(&self, hash: &str) -> Option<NodeId> {
        self.walk()
            .map(|(id, _)| id)
            .find(|id| self.hash_of(*id) == hash)
    }

    /// Distance from the root; `None` for stale ids.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        let mut entry = self.entry(id)?;
        let mut depth = 0;
        while let Some(parent) = entry.parent {
            entry = self.entry(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    /// True when `node` lies in the subtree rooted at `ancestor` (inclusive).
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.entry(id).and_then(|e| e.parent);
        }
        false
    }

    /// Ordered root → `target` path, inclusive. `None` targets the head.
    /// Empty only when `target` is stale.
    pub fn root_to_node_path(&self, target: Option<NodeId>) -> Vec<NodeId> {
        let target = target.unwrap_or(self.head);
        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            match self.entry(id) {
                Some(entry) => {
                    path.push(id);
                    cursor = entry.parent;
                }
                None => return Vec::new(),
            }
        }
        path.reverse();
        path
    }

    /// Root → node path for a hash; empty when the hash is unknown.
    pub fn root_to_hash_path(&self, hash: &str) -> Vec<NodeId> {
        match self.find(hash) {
            Some(id) => self.root_to_node_path(Some(id)),
            None => Vec::new(),
        }
    }

    /// Detached deep copy of the subtree under `id`.
    ///
    /// Built bottom-up: reverse pre-order visits every child before its
    /// parent, so no recursion is needed however deep the tree is.
    pub fn to_node(&self, id: NodeId) -> Option<ContextNode> {
        let order: Vec<NodeId> = self.walk_from(id).map(|(id, _)| id).collect();
        let mut built: HashMap<NodeId, ContextNode> = HashMap::with_capacity(order.len());
        for node_id in order.into_iter().rev() {
            let Some(entry) = self.entry(node_id) else {
                continue;
            };
            let children = entry
                .children
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(
                node_id,
                ContextNode::from_content(entry.content.clone(), children),
            );
        }
        built.remove(&id)
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            total: 0,
            pruned: 0,
            replaced: 0,
            max_depth: 0,
            head_hash: self.head_node().content_hash().clone(),
        };
        for (id, depth) in self.walk() {
            stats.total += 1;
            stats.max_depth = stats.max_depth.max(depth);
            if let Some(content) = self.content(id) {
                if content.is_pruned() {
                    stats.pruned += 1;
                }
                if content.is_replaced() {
                    stats.replaced += 1;
                }
            }
        }
        stats
    }

    // ---------------------------------------------------------------------
    // Mutators
    // ---------------------------------------------------------------------

    /// Attach `node` under `parent` (first pre-order hash match) or under
    /// the head when `parent` is `None`. Advances the head to the new node
    /// when `advance_head` is set.
    ///
    /// Returns [`TreeError::ParentNotFound`] for an explicit parent that is
    /// not in the tree; the tree is left unchanged.
    pub fn add_node(
        &mut self,
        node: ContextNode,
        parent: Option<&str>,
        advance_head: bool,
    ) -> Result<NodeId> {
        let parent_id = match parent {
            Some(hash) => self.find(hash).ok_or_else(|| {
                debug!(event = "tree.lookup_miss", op = "add_node", hash = %hash);
                TreeError::ParentNotFound {
                    hash: hash.to_string(),
                }
            })?,
            None => self.head,
        };

        let id = self.attach(Some(parent_id), node);
        if advance_head {
            self.head = id;
        }
        debug!(
            event = "tree.node_added",
            hash = %self.hash_of(id),
            parent = %self.hash_of(parent_id),
            head = %self.hash_of(self.head),
        );
        self.trace_structure();
        Ok(id)
    }

    /// Attach `node` under the head and move the head to it.
    pub fn push(&mut self, node: ContextNode) -> NodeId {
        let parent = self.head;
        let id = self.attach(Some(parent), node);
        self.head = id;
        debug!(
            event = "tree.node_added",
            hash = %self.hash_of(id),
            parent = %self.hash_of(parent),
            head = %self.hash_of(id),
        );
        self.trace_structure();
        id
    }

    /// Collapse the subtree under `hash` into `summary`.
    ///
    /// The node keeps its identity; its user and agent text become
    /// `summary`, its metadata becomes `{pruned: true}` and all of its
    /// descendants are freed. A head inside the subtree is moved to the
    /// pruned node before anything is freed.
    pub fn prune(&mut self, hash: &str, summary: &str) -> bool {
        let Some(target) = self.find(hash) else {
            debug!(event = "tree.lookup_miss", op = "prune", hash = %hash);
            return false;
        };

        let head_in_subtree = self.contains(target, self.head);
        if head_in_subtree {
            self.head = target;
        }

        let Some(entry) = self.entry_mut(target) else {
            return false;
        };
        entry.content.user_message = Some(summary.to_string());
        entry.content.agent_response = Some(summary.to_string());
        let mut metadata = Metadata::new();
        metadata.insert(PRUNED_KEY.to_string(), Value::Bool(true));
        entry.content.metadata = metadata;
        let children = std::mem::take(&mut entry.children);

        let freed = self.free_subtrees(children);
        debug!(
            event = "tree.pruned",
            hash = %hash,
            freed = freed,
            head_reanchored = head_in_subtree,
        );
        true
    }

    /// Replace a node's text with a trimmed `summary`, keeping its hash,
    /// children, system text and the head.
    pub fn replace(&mut self, hash: &str, summary: &str, label: Option<&str>) -> bool {
        let Some(target) = self.find(hash) else {
            debug!(event = "tree.lookup_miss", op = "replace", hash = %hash);
            return false;
        };
        let Some(entry) = self.entry_mut(target) else {
            return false;
        };

        let summary = summary.trim();
        entry.content.user_message = Some(summary.to_string());
        entry.content.agent_response = Some(summary.to_string());
        entry
            .content
            .metadata
            .insert(REPLACED_KEY.to_string(), Value::Bool(true));
        if let Some(label) = label {
            entry
                .content
                .metadata
                .insert(LABEL_KEY.to_string(), Value::String(label.trim().to_string()));
        }
        debug!(event = "tree.replaced", hash = %hash, labelled = label.is_some());
        true
    }

    /// Set `metadata.label`; everything else about the node is preserved.
    pub fn rename(&mut self, hash: &str, label: &str) -> bool {
        let Some(target) = self.find(hash) else {
            debug!(event = "tree.lookup_miss", op = "rename", hash = %hash);
            return false;
        };
        let Some(entry) = self.entry_mut(target) else {
            return false;
        };

        let label = label.trim();
        entry
            .content
            .metadata
            .insert(LABEL_KEY.to_string(), Value::String(label.to_string()));
        entry
            .content
            .metadata
            .insert(RENAMED_KEY.to_string(), Value::Bool(true));
        debug!(event = "tree.renamed", hash = %hash, label = %label);
        true
    }

    /// Look a node up by hash. The head is not touched.
    pub fn navigate(&self, hash: &str) -> Option<NodeId> {
        let found = self.find(hash);
        if found.is_none() {
            debug!(event = "tree.lookup_miss", op = "navigate", hash = %hash);
        }
        found
    }

    /// Move the head to `id`. Stale ids are refused and the head stays put.
    pub fn set_head(&mut self, id: NodeId) -> bool {
        if !self.contains_id(id) {
            return false;
        }
        self.head = id;
        debug!(event = "tree.head_moved", head = %self.hash_of(id));
        true
    }

    /// `navigate` followed by `set_head`.
    pub fn checkout(&mut self, hash: &str) -> bool {
        match self.navigate(hash) {
            Some(id) => self.set_head(id),
            None => false,
        }
    }

    /// Verify the structural invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let root = self
            .entry(self.root)
            .ok_or_else(|| TreeError::StructuralViolation("root slot is not live".into()))?;
        if root.parent.is_some() {
            return Err(TreeError::StructuralViolation("root has a parent".into()));
        }

        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(TreeError::StructuralViolation(format!(
                    "node {} reachable more than once",
                    self.hash_of(id)
                )));
            }
            let entry = self.entry(id).ok_or_else(|| {
                TreeError::StructuralViolation(format!("dangling child link {id:?}"))
            })?;
            for child in &entry.children {
                match self.entry(*child) {
                    Some(c) if c.parent == Some(id) => stack.push(*child),
                    Some(_) => {
                        return Err(TreeError::StructuralViolation(format!(
                            "parent link of {} does not match",
                            self.hash_of(*child)
                        )))
                    }
                    None => {
                        return Err(TreeError::StructuralViolation(format!(
                            "dangling child link {child:?}"
                        )))
                    }
                }
            }
        }

        let live = self.len();
        if seen.len() != live {
            return Err(TreeError::StructuralViolation(format!(
                "{} live nodes but {} reachable from root",
                live,
                seen.len()
            )));
        }
        if !seen.contains(&self.head) {
            return Err(TreeError::StructuralViolation(
                "head does not denote a reachable node".into(),
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub(crate) fn content(&self, id: NodeId) -> Option<&NodeContent> {
        self.entry(id).map(|e| &e.content)
    }

    fn hash_of(&self, id: NodeId) -> &str {
        self.content(id)
            .map(|c| c.content_hash.as_str())
            .unwrap_or_default()
    }

    /// Create a view of an id known to be live (root or head).
    fn view(&self, id: NodeId) -> TreeNode<'_> {
        match self.get(id) {
            Some(node) => node,
            None => unreachable!("root and head are always live"),
        }
    }

    fn alloc(&mut self, entry: Entry) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Move a detached node and its descendants into the arena.
    fn attach(&mut self, parent: Option<NodeId>, node: ContextNode) -> NodeId {
        let (content, children) = node.into_parts();
        let id = self.alloc(Entry {
            content,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent.and_then(|p| self.entry_mut(p)) {
            parent.children.push(id);
        }

        let mut pending: Vec<(NodeId, ContextNode)> =
            children.into_iter().rev().map(|c| (id, c)).collect();
        while let Some((parent_id, child)) = pending.pop() {
            let (content, grandchildren) = child.into_parts();
            let child_id = self.alloc(Entry {
                content,
                parent: Some(parent_id),
                children: Vec::new(),
            });
            if let Some(parent) = self.entry_mut(parent_id) {
                parent.children.push(child_id);
            }
            pending.extend(grandchildren.into_iter().rev().map(|g| (child_id, g)));
        }
        id
    }

    /// Free every node under `roots` (inclusive). Returns the count freed.
    fn free_subtrees(&mut self, roots: Vec<NodeId>) -> usize {
        let mut stack = roots;
        let mut freed = 0;
        while let Some(id) = stack.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            if let Some(entry) = slot.entry.take() {
                stack.extend(entry.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                freed += 1;
            }
        }
        freed
    }

    fn trace_structure(&self) {
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(
                event = "tree.structure",
                structure = %render::structure_string(self, &StructureOptions::labelled()),
            );
        }
    }
}

/// Read view of one live node.
#[derive(Clone, Copy)]
pub struct TreeNode<'a> {
    tree: &'a ContextTree,
    id: NodeId,
    entry: &'a Entry,
}

impl<'a> TreeNode<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn content(&self) -> &'a NodeContent {
        &self.entry.content
    }

    pub fn content_hash(&self) -> &'a ContentHash {
        &self.entry.content.content_hash
    }

    pub fn user_message(&self) -> Option<&'a str> {
        self.entry.content.user_message.as_deref()
    }

    pub fn agent_response(&self) -> Option<&'a str> {
        self.entry.content.agent_response.as_deref()
    }

    pub fn system_response(&self) -> Option<&'a str> {
        self.entry.content.system_response.as_deref()
    }

    pub fn metadata(&self) -> &'a Metadata {
        &self.entry.content.metadata
    }

    pub fn children(&self) -> &'a [NodeId] {
        &self.entry.children
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = TreeNode<'a>> + 'a {
        let tree = self.tree;
        let entry = self.entry;
        entry
            .children
            .iter()
            .filter_map(move |child| tree.get(*child))
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.entry.parent
    }

    pub fn is_root(&self) -> bool {
        self.id == self.tree.root
    }

    pub fn is_head(&self) -> bool {
        self.id == self.tree.head
    }

    pub fn is_pruned(&self) -> bool {
        flag_set(self.metadata(), PRUNED_KEY)
    }

    pub fn is_replaced(&self) -> bool {
        flag_set(self.metadata(), REPLACED_KEY)
    }

    /// `metadata.label` when it is a string.
    pub fn label(&self) -> Option<&'a str> {
        self.metadata().get(LABEL_KEY).and_then(Value::as_str)
    }
}

impl fmt::Debug for TreeNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("content_hash", self.content_hash())
            .field("children", &self.entry.children.len())
            .field("head", &self.is_head())
            .finish()
    }
}

/// Pre-order iterator over `(id, depth)` pairs.
pub struct Preorder<'a> {
    tree: &'a ContextTree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for Preorder<'_> {
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        if let Some(entry) = self.tree.entry(id) {
            self.stack
                .extend(entry.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        Some((id, depth))
    }
}

/// Aggregate counts over a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    pub total: usize,
    pub pruned: usize,
    pub replaced: usize,
    pub max_depth: usize,
    pub head_hash: ContentHash,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total nodes: {} | Pruned: {} | Replaced: {} | Max depth: {} | HEAD: [{}]",
            self.total, self.pruned, self.replaced, self.max_depth, self.head_hash
        )
    }
}
