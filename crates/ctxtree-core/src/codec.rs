//! Persisted record form of a context tree.
//!
//! The record is one nested object per node plus the head's hash:
//!
//! ```json
//! {
//!   "root": {
//!     "user_message": "", "agent_response": "", "system_response": "...",
//!     "metadata": {}, "content_hash": "1a2b3c4d",
//!     "children": [ ... ]
//!   },
//!   "head_hash": "1a2b3c4d"
//! }
//! ```
//!
//! Hashes are stored, not recomputed, so replaced and pruned nodes keep
//! their identities across a round trip.
//!
//! Every tree level adds two levels of JSON nesting, and a long agent
//! session is mostly one deep chain. Encoding and decoding therefore run
//! without serde_json's recursion limit and grow the stack on demand.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::hash::ContentHash;
use crate::node::ContextNode;
use crate::tree::ContextTree;

/// Serializable snapshot of a whole tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub root: ContextNode,
    #[serde(default)]
    pub head_hash: Option<ContentHash>,
}

impl TreeRecord {
    /// Number of nodes in the record.
    pub fn len(&self) -> usize {
        self.root.subtree_len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Decode JSON bytes of any nesting depth.
pub(crate) fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Decode a JSON value of any nesting depth into `T`.
pub(crate) fn from_json_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(T::deserialize(serde_stacker::Deserializer::new(value))?)
}

/// Pretty-printed JSON of any nesting depth.
pub(crate) fn to_vec_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::pretty(&mut out);
    value.serialize(serde_stacker::Serializer::new(&mut ser))?;
    Ok(out)
}

pub(crate) fn to_json_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(value.serialize(serde_stacker::Serializer::new(
        serde_json::value::Serializer,
    ))?)
}

fn validate_hashes(node: &ContextNode) -> Result<()> {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if node.content_hash().as_str().trim().is_empty() {
            return Err(TreeError::InvalidRecord(
                "node with empty content_hash".to_string(),
            ));
        }
        stack.extend(node.children());
    }
    Ok(())
}

impl ContextTree {
    /// Snapshot the whole tree, head included.
    pub fn serialize(&self) -> TreeRecord {
        let root = match self.to_node(self.root()) {
            Some(root) => root,
            None => unreachable!("root is always live"),
        };
        TreeRecord {
            root,
            head_hash: Some(self.head_node().content_hash().clone()),
        }
    }

    /// Rebuild a tree from a record.
    ///
    /// An absent `head_hash` puts the head at the root. A `head_hash` that
    /// matches no node, or a node without a hash, is an
    /// [`TreeError::InvalidRecord`].
    pub fn deserialize(record: TreeRecord) -> Result<Self> {
        validate_hashes(&record.root)?;

        let mut tree = ContextTree::new(record.root);
        if let Some(head_hash) = record.head_hash {
            let head = tree.find(head_hash.as_str()).ok_or_else(|| {
                TreeError::InvalidRecord(format!("head_hash {head_hash} matches no node"))
            })?;
            tree.set_head(head);
        }
        debug!(
            event = "tree.loaded",
            nodes = tree.len(),
            head = %tree.head_node().content_hash(),
        );
        Ok(tree)
    }

    pub fn to_value(&self) -> Result<Value> {
        to_json_value(&self.serialize())
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Self::deserialize(from_json_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        let bytes = to_vec_pretty(&self.serialize())?;
        String::from_utf8(bytes)
            .map_err(|e| TreeError::InvalidRecord(format!("encoded record is not UTF-8: {e}")))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::deserialize(from_slice(text.as_bytes())?)
    }
}
