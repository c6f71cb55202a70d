//! Detached context nodes.
//!
//! A [`ContextNode`] is one turn or event in its owned, detached form: the
//! shape agent action handlers build before attaching it to a tree, and the
//! shape each node takes inside a persisted record.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::ContentHash;

/// Ordered string-keyed map of mixed values attached to a node.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key set by `prune`.
pub const PRUNED_KEY: &str = "pruned";
/// Metadata key set by `replace`.
pub const REPLACED_KEY: &str = "replaced";
/// Metadata key set by `rename`.
pub const RENAMED_KEY: &str = "renamed";
/// Preferred metadata key for a node's short label.
pub const LABEL_KEY: &str = "label";
/// Secondary metadata key consulted for a node's short label.
pub const NODE_LABEL_KEY: &str = "node_label";

/// One record of agent history together with the children it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    pub user_message: Option<String>,
    pub agent_response: Option<String>,
    pub system_response: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    content_hash: ContentHash,
    #[serde(default)]
    children: Vec<ContextNode>,
}

impl ContextNode {
    /// Create a node with all three text fields present.
    pub fn new(
        user_message: impl Into<String>,
        agent_response: impl Into<String>,
        system_response: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self::from_parts(
            Some(user_message.into()),
            Some(agent_response.into()),
            Some(system_response.into()),
            metadata,
        )
    }

    /// Create a node whose text fields may be absent.
    pub fn from_parts(
        user_message: Option<String>,
        agent_response: Option<String>,
        system_response: Option<String>,
        metadata: Metadata,
    ) -> Self {
        let content_hash = ContentHash::compute(
            user_message.as_deref(),
            agent_response.as_deref(),
            system_response.as_deref(),
            &metadata,
        );
        Self {
            user_message,
            agent_response,
            system_response,
            metadata,
            content_hash,
            children: Vec::new(),
        }
    }

    /// Override the computed hash, e.g. to restore an identity known from
    /// an earlier session.
    #[must_use]
    pub fn with_content_hash(mut self, hash: impl Into<ContentHash>) -> Self {
        self.content_hash = hash.into();
        self
    }

    /// Append `child`; the node takes ownership. Hashes are unaffected.
    pub fn add_child(&mut self, child: ContextNode) {
        self.children.push(child);
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn children(&self) -> &[ContextNode] {
        &self.children
    }

    pub(crate) fn into_parts(mut self) -> (NodeContent, Vec<ContextNode>) {
        (
            NodeContent {
                user_message: self.user_message.take(),
                agent_response: self.agent_response.take(),
                system_response: self.system_response.take(),
                metadata: std::mem::take(&mut self.metadata),
                content_hash: std::mem::take(&mut self.content_hash),
            },
            std::mem::take(&mut self.children),
        )
    }

    pub(crate) fn from_content(content: NodeContent, children: Vec<ContextNode>) -> Self {
        Self {
            user_message: content.user_message,
            agent_response: content.agent_response,
            system_response: content.system_response,
            metadata: content.metadata,
            content_hash: content.content_hash,
            children,
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.children);
        }
        count
    }
}

// Long sessions nest thousands of levels deep; unlink children level by
// level instead of recursing.
impl Drop for ContextNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// The content of a node without its child links.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeContent {
    pub user_message: Option<String>,
    pub agent_response: Option<String>,
    pub system_response: Option<String>,
    pub metadata: Metadata,
    pub(crate) content_hash: ContentHash,
}

impl NodeContent {
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn is_pruned(&self) -> bool {
        flag_set(&self.metadata, PRUNED_KEY)
    }

    pub fn is_replaced(&self) -> bool {
        flag_set(&self.metadata, REPLACED_KEY)
    }
}

impl fmt::Display for NodeContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] user={:?} agent={:?} system={:?} metadata={}",
            self.content_hash,
            self.user_message.as_deref().unwrap_or_default(),
            self.agent_response.as_deref().unwrap_or_default(),
            self.system_response.as_deref().unwrap_or_default(),
            Value::Object(self.metadata.clone()),
        )
    }
}

/// True when `metadata[key]` is truthy.
pub(crate) fn flag_set(metadata: &Metadata, key: &str) -> bool {
    match metadata.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
