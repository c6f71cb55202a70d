//! ctxtree - inspect and edit an agent's persisted context tree
//!
//! ## Commands
//!
//! - `init`: Create a state file holding a single root node
//! - `add`: Attach a new turn under the head (or an explicit parent)
//! - `prune` / `replace` / `rename`: Compact or relabel nodes in place
//! - `checkout`: Move the head to another node
//! - `show` / `summary` / `path` / `subtree` / `stats` / `prompt`: Render views
//! - `export`: Print the persisted record as JSON

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};

use ctxtree_core::node::LABEL_KEY;
use ctxtree_core::{
    init_tracing, parse_user_label, prompt_view, store, ContextNode, ContextTree, Metadata,
    RenderConfig, StructureOptions,
};

#[derive(Parser)]
#[command(name = "ctxtree")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and edit a coding agent's context tree", long_about = None)]
struct Cli {
    /// Path to the agent state file
    #[arg(long, global = true, env = "CTXTREE_STATE", default_value = ".ctxtree/state.json")]
    state: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new state file with a root node
    Init {
        /// System prompt stored on the root
        #[arg(long, default_value = "")]
        system: String,

        /// Overwrite an existing tree
        #[arg(long)]
        force: bool,
    },

    /// Attach a new node
    Add {
        /// User message; a `[label: ...]` prefix becomes the node label
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        system: Option<String>,

        /// Parent hash (default: current head)
        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        label: Option<String>,

        /// Metadata entry as key=value; JSON values are parsed
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Leave the head where it is
        #[arg(long)]
        no_advance: bool,
    },

    /// Collapse a node's subtree into a summary
    Prune { hash: String, summary: String },

    /// Shorten a node's text, keeping its children
    Replace {
        hash: String,
        summary: String,

        #[arg(long)]
        label: Option<String>,
    },

    /// Set a node's label
    Rename { hash: String, label: String },

    /// Move the head to a node
    Checkout { hash: String },

    /// Print the tree structure
    Show {
        /// Append short labels to each line
        #[arg(long)]
        labels: bool,

        #[arg(long)]
        max_words: Option<usize>,

        #[arg(long)]
        max_label_len: Option<usize>,
    },

    /// Print a per-node digest of text and metadata keys
    Summary {
        #[arg(long)]
        max_len: Option<usize>,

        #[arg(long)]
        max_keys: Option<usize>,
    },

    /// Print the root -> node path (default: head)
    Path { hash: Option<String> },

    /// Print the subtree under a node (default: head)
    Subtree { hash: Option<String> },

    /// Print node counts and depth
    Stats,

    /// Print the prompt view with its size accounting
    Prompt,

    /// Print the persisted record as JSON
    Export,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = RenderConfig::from_env();
    let state = cli.state.as_path();

    match cli.command {
        Commands::Init { system, force } => cmd_init(state, &system, force),
        Commands::Add {
            user,
            agent,
            system,
            parent,
            label,
            meta,
            no_advance,
        } => {
            let node = build_node(user, agent, system, label, &meta)?;
            cmd_add(state, node, parent.as_deref(), !no_advance)
        }
        Commands::Prune { hash, summary } => {
            cmd_mutate(state, "prune", &hash, |tree| tree.prune(&hash, &summary))
        }
        Commands::Replace {
            hash,
            summary,
            label,
        } => cmd_mutate(state, "replace", &hash, |tree| {
            tree.replace(&hash, &summary, label.as_deref())
        }),
        Commands::Rename { hash, label } => {
            cmd_mutate(state, "rename", &hash, |tree| tree.rename(&hash, &label))
        }
        Commands::Checkout { hash } => {
            cmd_mutate(state, "checkout", &hash, |tree| tree.checkout(&hash))
        }
        Commands::Show {
            labels,
            max_words,
            max_label_len,
        } => {
            let mut opts = config.structure();
            opts.include_labels |= labels;
            if let Some(n) = max_words {
                opts.max_words = n;
            }
            if let Some(n) = max_label_len {
                opts.max_label_len = n;
            }
            cmd_show(state, &opts)
        }
        Commands::Summary { max_len, max_keys } => {
            let mut opts = config.summary();
            if let Some(n) = max_len {
                opts.max_len = n;
            }
            if let Some(n) = max_keys {
                opts.max_keys = n;
            }
            let tree = load_tree(state)?;
            print!("{}", tree.summary_string(&opts));
            Ok(())
        }
        Commands::Path { hash } => {
            let tree = load_tree(state)?;
            let target = resolve(&tree, hash.as_deref())?;
            println!("{}", tree.path_string(Some(target), &config));
            Ok(())
        }
        Commands::Subtree { hash } => {
            let tree = load_tree(state)?;
            let target = resolve(&tree, hash.as_deref())?;
            print!("{}", tree.head_subtree_string(Some(target), &config));
            Ok(())
        }
        Commands::Stats => {
            let tree = load_tree(state)?;
            println!("{}", tree.stats());
            Ok(())
        }
        Commands::Prompt => {
            let tree = load_tree(state)?;
            let view = prompt_view(&tree, &config);
            if view.over_budget {
                info!(size = view.size, hard_max = config.prompt_hard_max, "Prompt over budget");
            }
            println!("{}", view.text);
            Ok(())
        }
        Commands::Export => {
            let tree = load_tree(state)?;
            println!("{}", tree.to_json_pretty()?);
            Ok(())
        }
    }
}

/// Load the tree at `path`, failing when there is none.
fn load_tree(path: &Path) -> Result<ContextTree> {
    store::load(path)
        .with_context(|| format!("Failed to load state file: {}", path.display()))?
        .ok_or_else(|| {
            anyhow!(
                "No context tree at {}; run `ctxtree init` first",
                path.display()
            )
        })
}

fn save_tree(path: &Path, tree: &ContextTree) -> Result<()> {
    store::save(path, tree)
        .with_context(|| format!("Failed to save state file: {}", path.display()))
}

/// Node for `hash`, or the head when no hash is given.
fn resolve(tree: &ContextTree, hash: Option<&str>) -> Result<ctxtree_core::NodeId> {
    match hash {
        None => Ok(tree.head()),
        Some(hash) => tree
            .find(hash)
            .ok_or_else(|| anyhow!("No node with hash {hash}")),
    }
}

/// Split a `key=value` flag. Values that parse as JSON keep their type.
fn parse_meta(entry: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("Metadata entry {entry:?} is not KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Metadata entry {entry:?} has an empty key");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn build_node(
    user: Option<String>,
    agent: Option<String>,
    system: Option<String>,
    label: Option<String>,
    meta: &[String],
) -> Result<ContextNode> {
    let mut metadata = Metadata::new();
    for entry in meta {
        let (key, value) = parse_meta(entry)?;
        metadata.insert(key, value);
    }

    let (parsed_label, user) = match user {
        Some(text) => {
            let (label, message) = parse_user_label(&text);
            (label, Some(message))
        }
        None => (None, None),
    };
    if let Some(label) = label.or(parsed_label) {
        metadata.insert(LABEL_KEY.to_string(), Value::String(label));
    }

    Ok(ContextNode::from_parts(user, agent, system, metadata))
}

fn cmd_init(path: &Path, system: &str, force: bool) -> Result<()> {
    let existing = store::load(path)
        .with_context(|| format!("Failed to read existing state file: {}", path.display()))?;
    if !force && existing.is_some() {
        bail!(
            "A context tree already exists at {}; pass --force to replace it",
            path.display()
        );
    }

    let tree = ContextTree::new(ContextNode::new("", "", system, Metadata::new()));
    save_tree(path, &tree)?;

    info!("Initialized context tree at {}", path.display());
    println!("Initialized context tree at {}", path.display());
    println!("Root: {}", tree.root_node().content_hash());
    Ok(())
}

fn cmd_add(path: &Path, node: ContextNode, parent: Option<&str>, advance: bool) -> Result<()> {
    let mut tree = load_tree(path)?;
    let id = tree
        .add_node(node, parent, advance)
        .context("Failed to add node")?;
    save_tree(path, &tree)?;

    let hash = tree.get(id).map(|n| n.content_hash().to_string());
    println!("Added node: {}", hash.unwrap_or_default());
    println!("HEAD: {}", tree.head_node().content_hash());
    Ok(())
}

/// Apply a hash-addressed edit and save; a miss leaves the file untouched.
fn cmd_mutate(
    path: &Path,
    op: &str,
    hash: &str,
    apply: impl FnOnce(&mut ContextTree) -> bool,
) -> Result<()> {
    let mut tree = load_tree(path)?;
    if !apply(&mut tree) {
        bail!("{op}: no node with hash {hash}");
    }
    save_tree(path, &tree)?;

    println!("{op}: [{hash}] ok");
    println!("HEAD: {}", tree.head_node().content_hash());
    Ok(())
}

fn cmd_show(path: &Path, opts: &StructureOptions) -> Result<()> {
    let tree = load_tree(path)?;
    print!("{}", tree.structure_string(opts));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_meta_json_and_plain_values() {
        assert_eq!(parse_meta("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(parse_meta("ok=true").unwrap(), ("ok".to_string(), json!(true)));
        assert_eq!(
            parse_meta("cmd=ls -la").unwrap(),
            ("cmd".to_string(), json!("ls -la"))
        );
        assert_eq!(parse_meta("eq=a=b").unwrap(), ("eq".to_string(), json!("a=b")));
    }

    #[test]
    fn test_parse_meta_rejects_malformed() {
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta(" =x").is_err());
    }

    #[test]
    fn test_build_node_takes_label_from_user_prefix() {
        let node = build_node(
            Some("[label: Setup] install deps".into()),
            None,
            None,
            None,
            &[],
        )
        .unwrap();
        assert_eq!(node.user_message.as_deref(), Some("install deps"));
        assert_eq!(node.metadata[LABEL_KEY], json!("Setup"));
    }

    #[test]
    fn test_build_node_explicit_label_wins() {
        let node = build_node(
            Some("label: Parsed | body".into()),
            Some("reply".into()),
            None,
            Some("Explicit".into()),
            &["k=v".into()],
        )
        .unwrap();
        assert_eq!(node.metadata[LABEL_KEY], json!("Explicit"));
        assert_eq!(node.metadata["k"], json!("v"));
        assert_eq!(node.agent_response.as_deref(), Some("reply"));
    }

    #[test]
    fn test_resolve_defaults_to_head() {
        let mut tree = ContextTree::new(ContextNode::new("", "", "sys", Metadata::new()));
        let a = tree.push(ContextNode::new("a", "", "", Metadata::new()));
        assert_eq!(resolve(&tree, None).unwrap(), a);
        assert!(resolve(&tree, Some("nothere1")).is_err());
    }

    #[test]
    fn test_commands_persist_through_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        cmd_init(&path, "base prompt", false).unwrap();
        assert!(cmd_init(&path, "again", false).is_err());

        let node = build_node(Some("first".into()), None, None, None, &[]).unwrap();
        cmd_add(&path, node, None, true).unwrap();

        let tree = load_tree(&path).unwrap();
        assert_eq!(tree.len(), 2);
        let head_hash = tree.head_node().content_hash().to_string();

        cmd_mutate(&path, "prune", &head_hash, |t| t.prune(&head_hash, "done")).unwrap();
        assert!(load_tree(&path).unwrap().head_node().is_pruned());

        let missing = cmd_mutate(&path, "checkout", "nothere1", |t| t.checkout("nothere1"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_init_keeps_unreadable_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ truncated").unwrap();

        assert!(cmd_init(&path, "base", false).is_err());
        assert!(cmd_init(&path, "base", true).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"{ truncated");
    }

    #[test]
    fn test_init_into_host_file_keeps_its_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"phase": "Plan"}"#).unwrap();

        cmd_init(&path, "base", false).unwrap();

        let document = store::read_document(&path).unwrap().unwrap();
        assert_eq!(document.extra["phase"], serde_json::json!("Plan"));
        assert_eq!(document.context_tree.len(), 1);
    }

    #[test]
    fn test_load_without_init_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_tree(&dir.path().join("state.json")).is_err());
    }
}
