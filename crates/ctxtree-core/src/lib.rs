//! ctxtree core library
//!
//! An autonomous coding agent's working history as a content-addressed tree:
//! nodes are addressed by short hashes, a head cursor marks where new work
//! attaches, subtrees can be pruned into summaries or replaced in place, and
//! bounded text views of the tree feed the next model prompt.

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod label;
pub mod node;
pub mod render;
pub mod store;
pub mod telemetry;
pub mod tree;

pub use codec::TreeRecord;
pub use config::RenderConfig;
pub use error::{Result, TreeError};
pub use hash::{canonical_json, ContentHash, HASH_LEN};
pub use label::parse_user_label;
pub use node::{ContextNode, Metadata, NodeContent};
pub use render::{
    full_string, head_subtree_string, meta_keys_summary, path_string, prompt_view, short_label,
    shorten, structure_string, summary_string, PromptView, StructureOptions, SummaryOptions,
};
pub use store::{default_state_path, StateDocument};
pub use telemetry::init_tracing;
pub use tree::{ContextTree, NodeId, Preorder, TreeNode, TreeStats};

/// ctxtree version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a tree rooted at `root`, with the head on the root.
pub fn new_tree(root: ContextNode) -> ContextTree {
    ContextTree::new(root)
}
