//! Bounded, deterministic text views of a context tree.
//!
//! Every function here is read-only. Size limits come in explicitly through
//! [`StructureOptions`], [`SummaryOptions`] or a [`RenderConfig`]; nothing
//! consults process-wide state while rendering.

use std::fmt;

use serde_json::Value;

use crate::config::RenderConfig;
use crate::node::{flag_set, Metadata, NodeContent, LABEL_KEY, NODE_LABEL_KEY};
use crate::tree::{ContextTree, NodeId};

pub const STRUCTURE_HEADER: &str = "=== CONTEXT TREE STRUCTURE ===";
pub const SUMMARY_HEADER: &str = "=== CONTEXT TREE (SUMMARY) ===";
pub const SUBTREE_HEADER: &str = "=== CONTEXT SUBTREE ===";
pub const FULL_HEADER: &str = "=== CONTEXT TREE ===";
pub const HEAD_HEADER: &str = "=== HEAD ===";

const ELLIPSIS: char = '…';
const HEAD_MARKER: &str = " (HEAD)";
const PRUNED_MARKER: &str = " [PRUNED]";

/// Knobs for [`structure_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureOptions {
    pub include_labels: bool,
    pub max_words: usize,
    pub max_label_len: usize,
}

impl StructureOptions {
    /// Defaults with labels switched on.
    pub fn labelled() -> Self {
        Self {
            include_labels: true,
            ..Self::default()
        }
    }
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            include_labels: false,
            max_words: 10,
            max_label_len: 32,
        }
    }
}

/// Knobs for [`summary_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    pub max_len: usize,
    pub max_keys: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_len: 120,
            max_keys: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Cut `s` to at most `max_chars` characters, ending in an ellipsis if cut.
fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Single-line form of `text`, cut to `max_len` characters.
pub fn shorten(text: Option<&str>, max_len: usize) -> String {
    let Some(text) = text else {
        return String::new();
    };
    clip(&text.replace(['\n', '\r'], " "), max_len)
}

/// `k1, k2 (+N)` digest of the metadata keys.
pub fn meta_keys_summary(metadata: &Metadata, max_keys: usize) -> String {
    let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
    let shown = keys.len().min(max_keys);
    let base = keys[..shown].join(", ");
    let more = keys.len() - shown;
    if more > 0 {
        format!("{base} (+{more})")
    } else {
        base
    }
}

/// Short one-line label for a node.
///
/// Preference order: a truthy `metadata.label`, a truthy
/// `metadata.node_label`, then the first non-empty of agent, user and
/// system text, then the first metadata key. A chosen text that is only
/// whitespace gives an empty label; it does not fall through to the next
/// field.
pub fn short_label(content: &NodeContent, max_words: usize, max_len: usize) -> String {
    let from_metadata = [LABEL_KEY, NODE_LABEL_KEY]
        .iter()
        .filter(|key| flag_set(&content.metadata, key))
        .find_map(|key| match content.metadata.get(*key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

    let label = from_metadata
        .or_else(|| {
            [
                content.agent_response.as_deref(),
                content.user_message.as_deref(),
                content.system_response.as_deref(),
            ]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .map(str::to_string)
        })
        .or_else(|| content.metadata.keys().next().cloned());

    let Some(label) = label else {
        return String::new();
    };
    let words: Vec<&str> = label.split_whitespace().take(max_words).collect();
    clip(&words.join(" "), max_len)
}

fn markers(tree: &ContextTree, id: NodeId, content: &NodeContent) -> String {
    let mut out = String::new();
    if id == tree.head() {
        out.push_str(HEAD_MARKER);
    }
    if content.is_pruned() {
        out.push_str(PRUNED_MARKER);
    }
    out
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

fn structure_lines(tree: &ContextTree, start: NodeId, opts: &StructureOptions, out: &mut String) {
    for (id, depth) in tree.walk_from(start) {
        let Some(content) = tree.content(id) else {
            continue;
        };
        out.push_str(&"  ".repeat(depth));
        out.push_str("- [");
        out.push_str(content.content_hash().as_str());
        out.push(']');
        out.push_str(&markers(tree, id, content));
        if opts.include_labels {
            let label = short_label(content, opts.max_words, opts.max_label_len);
            if !label.is_empty() {
                out.push_str(" — ");
                out.push_str(&label);
            }
        }
        out.push('\n');
    }
}

/// Pre-order listing, one line per node:
/// `<indent>- [hash]{ (HEAD)}{ [PRUNED]}{ — label}`.
pub fn structure_string(tree: &ContextTree, opts: &StructureOptions) -> String {
    let mut out = format!("{STRUCTURE_HEADER}\n");
    structure_lines(tree, tree.root(), opts, &mut out);
    out
}

/// Per-node digest of text fields and metadata keys. Empty fields are
/// left out of a line.
pub fn summary_string(tree: &ContextTree, opts: &SummaryOptions) -> String {
    let mut lines = vec![SUMMARY_HEADER.to_string()];
    for (id, depth) in tree.walk() {
        let Some(content) = tree.content(id) else {
            continue;
        };
        let mut line = format!(
            "{}- [{}]{}",
            "  ".repeat(depth),
            content.content_hash(),
            markers(tree, id, content)
        );
        let fields = [
            ("u", content.user_message.as_deref()),
            ("a", content.agent_response.as_deref()),
            ("s", content.system_response.as_deref()),
        ];
        for (tag, text) in fields {
            let short = shorten(text, opts.max_len);
            if !short.is_empty() {
                line.push_str(&format!(" {tag}={short:?}"));
            }
        }
        let keys = meta_keys_summary(&content.metadata, opts.max_keys);
        if !keys.is_empty() {
            line.push_str(&format!(" m={keys:?}"));
        }
        lines.push(line);
    }
    lines.join("\n") + "\n"
}

/// `[h] label -> [h] label -> ...` from the root to `target` (head if `None`).
pub fn path_string(
    tree: &ContextTree,
    target: Option<NodeId>,
    max_words: usize,
    max_len: usize,
) -> String {
    tree.root_to_node_path(target)
        .into_iter()
        .filter_map(|id| tree.content(id))
        .map(|content| {
            let label = short_label(content, max_words, max_len);
            if label.is_empty() {
                format!("[{}]", content.content_hash())
            } else {
                format!("[{}] {}", content.content_hash(), label)
            }
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Root → `target` path line followed by the labelled structure of the
/// target's own subtree.
pub fn head_subtree_string(
    tree: &ContextTree,
    target: Option<NodeId>,
    config: &RenderConfig,
) -> String {
    let target = target.unwrap_or(tree.head());
    let mut out = format!("{SUBTREE_HEADER}\n");
    out.push_str(&path_string(
        tree,
        Some(target),
        config.path_label_words,
        config.path_label_len,
    ));
    out.push('\n');
    out.push_str(STRUCTURE_HEADER);
    out.push('\n');
    let opts = StructureOptions {
        include_labels: true,
        max_words: 3,
        max_label_len: config.path_label_len,
    };
    structure_lines(tree, target, &opts, &mut out);
    out
}

/// Every node with all of its fields, then the head block.
pub fn full_string(tree: &ContextTree) -> String {
    let mut out = format!("{FULL_HEADER}\n");
    for (id, depth) in tree.walk() {
        if let Some(content) = tree.content(id) {
            out.push_str(&format!("{}{}\n", "  ".repeat(depth), content));
        }
    }
    out.push_str(&format!("\n{HEAD_HEADER}\n{}", tree.head_node().content()));
    out
}

/// Prompt text with its size accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptView {
    pub text: String,
    /// Character count of the tree dump, excluding the size and policy lines.
    pub size: usize,
    pub over_budget: bool,
}

/// Full dump plus a size line, and a compaction policy when the dump is
/// larger than `config.prompt_hard_max`.
pub fn prompt_view(tree: &ContextTree, config: &RenderConfig) -> PromptView {
    let core = full_string(tree);
    let size = core.chars().count();
    let hard_max = config.prompt_hard_max;
    let over_budget = size > hard_max;

    let mut text = core;
    text.push_str(&format!(
        "\nContext Tree size: {size} characters; hard max {hard_max}."
    ));
    if over_budget {
        text.push_str(&format!(
            "\nPlanning policy: if the task is complex, split it into sections; \
             when a section is done, prune it and move up.\
             \nContext policy: size > {hard_max}. Prefer Replace (shorten node summaries, \
             keep children) and Prune (summarize and drop subtrees) until size < {hard_max}."
        ));
    }
    PromptView {
        text,
        size,
        over_budget,
    }
}

impl ContextTree {
    pub fn structure_string(&self, opts: &StructureOptions) -> String {
        structure_string(self, opts)
    }

    pub fn summary_string(&self, opts: &SummaryOptions) -> String {
        summary_string(self, opts)
    }

    pub fn path_string(&self, target: Option<NodeId>, config: &RenderConfig) -> String {
        path_string(self, target, config.path_label_words, config.path_label_len)
    }

    pub fn head_subtree_string(&self, target: Option<NodeId>, config: &RenderConfig) -> String {
        head_subtree_string(self, target, config)
    }

    pub fn full_string(&self) -> String {
        full_string(self)
    }
}

impl fmt::Display for ContextTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&full_string(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContextNode;
    use serde_json::json;

    fn make(u: &str, a: &str, s: &str, m: Value) -> ContextNode {
        let metadata = match m {
            Value::Object(map) => map,
            _ => Metadata::new(),
        };
        ContextNode::new(u, a, s, metadata)
    }

    #[test]
    fn test_structure_marks_head_without_labels_by_default() {
        let mut tree = ContextTree::new(make("root", "agent", "system", json!({})));
        let child = tree.push(make("child", "agent2 words here", "system2", json!({})));
        let child_hash = tree.get(child).unwrap().content_hash().to_string();
        let root_hash = tree.root_node().content_hash().to_string();

        let out = tree.structure_string(&StructureOptions::default());
        assert!(out.starts_with(STRUCTURE_HEADER));
        assert!(!out.contains('—'));
        assert!(out.contains(&format!("- [{root_hash}]\n")));
        assert!(out.contains(&format!("  - [{child_hash}] (HEAD)\n")));
        assert!(!out.contains(&format!("[{root_hash}] (HEAD)")));
    }

    #[test]
    fn test_structure_labels_when_requested() {
        let mut tree = ContextTree::new(make("r", "a content for label", "s", json!({})).with_content_hash("rootL1"));
        tree.push(make("", "hello there general kenobi", "", json!({})).with_content_hash("childL2"));

        let out = tree.structure_string(&StructureOptions::labelled());
        assert!(out.contains("- [rootL1] — a content for label\n"));
        assert!(out.contains("[childL2] (HEAD) — hello there general kenobi"));
    }

    #[test]
    fn test_label_prefers_metadata() {
        let mut tree = ContextTree::new(make("", "a", "", json!({})));
        tree.push(make("", "agent says hi", "", json!({"label": "PLAN"})));
        let out = tree.structure_string(&StructureOptions::labelled());
        assert!(out.contains("— PLAN"));
        assert!(!out.contains("agent says hi"));
    }

    #[test]
    fn test_label_truncation_limits() {
        let mut tree = ContextTree::new(make("", "a", "", json!({})));
        tree.push(make("", &"word ".repeat(50), "", json!({})));
        let opts = StructureOptions {
            max_label_len: 10,
            ..StructureOptions::labelled()
        };
        let out = tree.structure_string(&opts);
        let line = out.lines().find(|l| l.contains("(HEAD)")).unwrap();
        let label = line.split('—').nth(1).unwrap().trim();
        assert!(label.chars().count() <= 10);
        assert!(label.ends_with('…'));
    }

    fn content_of(node: ContextNode) -> NodeContent {
        node.into_parts().0
    }

    #[test]
    fn test_short_label_fallbacks() {
        let empty = content_of(make("", "", "", json!({})));
        assert_eq!(short_label(&empty, 4, 32), "");

        let key_only = content_of(make("", "", "", json!({"Shell Command": "ls"})));
        assert_eq!(short_label(&key_only, 4, 32), "Shell Command");

        let user_only = content_of(make("line one\nline two  three four five", "", "", json!({})));
        assert_eq!(short_label(&user_only, 4, 32), "line one line two");

        let system_only = content_of(make("", "", "boot", json!({})));
        assert_eq!(short_label(&system_only, 4, 32), "boot");

        let blank_agent = content_of(make("user text", "   ", "boot", json!({})));
        assert_eq!(short_label(&blank_agent, 4, 32), "");

        let falsy_label = content_of(make("", "reply", "", json!({"label": 0, "node_label": false})));
        assert_eq!(short_label(&falsy_label, 4, 32), "reply");

        let node_label = content_of(make("", "text", "", json!({"label": "", "node_label": "NL"})));
        assert_eq!(short_label(&node_label, 4, 32), "NL");
    }

    #[test]
    fn test_summary_lines() {
        let mut root = make("", "", "system prompt here", json!({"root": true}));
        root = root.with_content_hash("root0000");
        let mut tree = ContextTree::new(root);
        tree.push(make("Hello Eve", "", "", json!({"k1": "v1"})).with_content_hash("n1000000"));

        let out = tree.summary_string(&SummaryOptions::default());
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(SUMMARY_HEADER));
        assert_eq!(lines.next(), Some(r#"- [root0000] s="system prompt here" m="root""#));
        assert_eq!(lines.next(), Some(r#"  - [n1000000] (HEAD) u="Hello Eve" m="k1""#));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_summary_truncates_fields_and_keys() {
        let mut tree = ContextTree::new(make("", "", "sys", json!({})));
        tree.push(make(
            "",
            &"Planning: step1; step2; step3;".repeat(50),
            &"S".repeat(2000),
            json!({"Shell Command": "ls", "STDOUT": "a", "extra": 1}),
        ));
        let out = tree.summary_string(&SummaryOptions {
            max_len: 60,
            max_keys: 2,
        });
        let line = out.lines().last().unwrap();
        assert!(line.contains('…'));
        assert!(line.contains(r#"m="Shell Command, STDOUT (+1)""#));
        let a_field = line.split(" a=\"").nth(1).unwrap().split('"').next().unwrap();
        assert_eq!(a_field.chars().count(), 60);
    }

    #[test]
    fn test_shorten_and_meta_keys() {
        assert_eq!(shorten(None, 10), "");
        assert_eq!(shorten(Some("a\nb"), 10), "a b");
        assert_eq!(shorten(Some("abcdef"), 4), "abc…");
        assert_eq!(shorten(Some("abcdef"), 1), "…");
        assert_eq!(shorten(Some("abcdef"), 0), "");
        assert_eq!(shorten(Some(""), 0), "");
        let m = json!({"a": 1, "b": 2, "c": 3});
        assert_eq!(meta_keys_summary(m.as_object().unwrap(), 5), "a, b, c");
        assert_eq!(meta_keys_summary(m.as_object().unwrap(), 1), "a (+2)");
        assert_eq!(meta_keys_summary(&Metadata::new(), 3), "");
    }

    #[test]
    fn test_path_and_head_subtree() {
        let mut tree = ContextTree::new(make("", "root words", "", json!({})).with_content_hash("r0000000"));
        let a = tree.push(make("", "step a", "", json!({})).with_content_hash("a0000000"));
        tree.push(make("", "step b", "", json!({})).with_content_hash("b0000000"));
        tree.set_head(a);

        let config = RenderConfig::default();
        assert_eq!(
            tree.path_string(None, &config),
            "[r0000000] root words -> [a0000000] step a"
        );

        let sub = tree.head_subtree_string(None, &config);
        assert!(sub.starts_with(SUBTREE_HEADER));
        assert!(sub.contains("[r0000000] root words -> [a0000000] step a\n"));
        assert!(sub.contains("- [a0000000] (HEAD) — step a\n  - [b0000000] — step b\n"));
        assert!(!sub.contains("- [r0000000]"));
    }

    #[test]
    fn test_full_string_and_prompt_view() {
        let mut tree = ContextTree::new(make("", "", "base prompt", json!({})));
        tree.push(make("do it", "", "", json!({})));
        let full = tree.to_string();
        assert!(full.starts_with(FULL_HEADER));
        assert!(full.contains(HEAD_HEADER));
        assert!(full.contains("base prompt"));

        let view = prompt_view(&tree, &RenderConfig::default());
        assert!(!view.over_budget);
        assert_eq!(view.size, full.chars().count());
        assert!(view.text.contains("Context Tree size:"));
        assert!(!view.text.contains("Context policy"));

        let tight = RenderConfig {
            prompt_hard_max: 10,
            ..RenderConfig::default()
        };
        let view = prompt_view(&tree, &tight);
        assert!(view.over_budget);
        assert!(view.text.contains("Context policy: size > 10"));
    }
}
