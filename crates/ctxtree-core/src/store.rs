//! On-disk agent state holding a persisted context tree.
//!
//! The state file is a JSON object whose `context_tree` key holds a
//! [`TreeRecord`]. Other top-level keys belong to the host agent (buffers,
//! phase, ...) and are carried through a load/save cycle untouched.
//!
//! Layout: `<workspace>/.ctxtree/state.json`

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::info;

use crate::codec::{self, TreeRecord};
use crate::error::{Result, TreeError};
use crate::tree::ContextTree;

pub const STATE_DIR: &str = ".ctxtree";
pub const STATE_FILE: &str = "state.json";
/// Top-level key holding the tree record.
pub const TREE_KEY: &str = "context_tree";

#[must_use]
pub fn default_state_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join(STATE_FILE)
}

/// Top-level document of a state file.
#[derive(Debug, Clone, Serialize)]
pub struct StateDocument {
    pub context_tree: TreeRecord,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateDocument {
    pub fn new(tree: &ContextTree) -> Self {
        Self {
            context_tree: tree.serialize(),
            extra: Map::new(),
        }
    }
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TreeError::io("reading state file", path, e)),
    }
}

/// Read a state file as a JSON object; `None` when the file does not exist.
///
/// Any other top-level JSON value is an [`TreeError::InvalidRecord`].
pub fn read_object(path: &Path) -> Result<Option<Map<String, Value>>> {
    let Some(bytes) = read_bytes(path)? else {
        return Ok(None);
    };
    match codec::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(TreeError::InvalidRecord(format!(
            "state file {} is not a JSON object",
            path.display()
        ))),
    }
}

/// Top-level keys of a state file except the tree, which is skipped
/// without being built.
struct HostKeys(Map<String, Value>);

impl<'de> Deserialize<'de> for HostKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = HostKeys;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<HostKeys, A::Error> {
                let mut keys = Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    if key == TREE_KEY {
                        map.next_value::<IgnoredAny>()?;
                    } else {
                        let value = map.next_value::<Value>()?;
                        keys.insert(key, value);
                    }
                }
                Ok(HostKeys(keys))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

/// Read a state document; `None` when the file does not exist or holds no
/// tree yet.
pub fn read_document(path: &Path) -> Result<Option<StateDocument>> {
    let Some(mut extra) = read_object(path)? else {
        return Ok(None);
    };
    let Some(record) = extra.remove(TREE_KEY) else {
        return Ok(None);
    };
    Ok(Some(StateDocument {
        context_tree: codec::from_json_value(record)?,
        extra,
    }))
}

/// Write a state document as pretty JSON, atomically.
pub fn write_document(path: &Path, document: &StateDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| TreeError::io("creating state directory", &dir, e))?;

    let content = codec::to_vec_pretty(document)?;
    let mut tmp = NamedTempFile::new_in(&dir)
        .map_err(|e| TreeError::io("creating temp state file", &dir, e))?;
    tmp.write_all(&content)
        .map_err(|e| TreeError::io("writing temp state file", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| TreeError::io("replacing state file", path, e.error))?;
    Ok(())
}

/// Load the tree stored at `path`; `None` when there is no state file or
/// the file has no `context_tree` yet.
pub fn load(path: &Path) -> Result<Option<ContextTree>> {
    let Some(document) = read_document(path)? else {
        return Ok(None);
    };
    let tree = ContextTree::deserialize(document.context_tree)?;
    info!(event = "store.loaded", path = %path.display(), nodes = tree.len());
    Ok(Some(tree))
}

/// Save `tree` to `path`. Only `context_tree` is written; every other
/// top-level key already in the file is kept. A file that is not a JSON
/// object is left alone and reported as an error.
pub fn save(path: &Path, tree: &ContextTree) -> Result<()> {
    let extra = match read_bytes(path)? {
        Some(bytes) => codec::from_slice::<HostKeys>(&bytes)?.0,
        None => Map::new(),
    };
    let document = StateDocument {
        context_tree: tree.serialize(),
        extra,
    };
    write_document(path, &document)?;
    info!(event = "store.saved", path = %path.display(), nodes = tree.len());
    Ok(())
}
