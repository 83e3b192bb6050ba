//! Repository index construction.
//!
//! Walks a checkout depth-first and assembles a nested, path-keyed tree.
//! Python files attach a [`ModuleIndex`] (degraded to raw lines when the
//! file does not parse); every other file attaches an opaque marker so the
//! tree stays path-complete. The root segment is keyed by the repository
//! directory's own name, keeping serialized indexes stable regardless of
//! where the checkout was mounted.

use crate::index::structure::ModuleIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index root {0} has no usable directory name")]
    BadRoot(PathBuf),

    #[error("failed to walk repository: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One node in the path-keyed structural tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexNode {
    Module(ModuleIndex),
    Dir(BTreeMap<String, IndexNode>),
    /// Non-source file, kept for path completeness. Serializes as `{}`,
    /// and deserializes back as an empty `Dir`; lookups treat the two
    /// interchangeably.
    Opaque {},
}

/// Queryable structural model of one repository checkout.
///
/// Built once per (repository, commit, optional base patch) and discarded
/// after the attempt; callers persist it explicitly via serde when needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryIndex {
    root: BTreeMap<String, IndexNode>,
}

impl RepositoryIndex {
    /// Build the index from a checkout directory.
    pub fn build(root_path: &Path) -> Result<Self, IndexError> {
        let root_name = root_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IndexError::BadRoot(root_path.to_path_buf()))?
            .to_string();

        let mut tree: BTreeMap<String, IndexNode> = BTreeMap::new();

        let walker = WalkDir::new(root_path)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry?;
            let rel = match entry.path().strip_prefix(root_path) {
                Ok(rel) if rel.as_os_str().is_empty() => continue,
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            if entry.file_type().is_dir() {
                insert_node(&mut tree, &parts, IndexNode::Dir(BTreeMap::new()));
                continue;
            }

            let node = if entry.path().extension().and_then(|e| e.to_str()) == Some("py") {
                let text = std::fs::read_to_string(entry.path()).map_err(|source| {
                    IndexError::Io {
                        path: entry.path().to_path_buf(),
                        source,
                    }
                })?;
                let rel_display = rel.to_string_lossy().into_owned();
                match ModuleIndex::parse(&rel_display, &text) {
                    Ok(module) => IndexNode::Module(module),
                    Err(err) => {
                        tracing::debug!(file = %rel_display, %err, "parse failed, degrading to raw lines");
                        IndexNode::Module(ModuleIndex::degraded(&rel_display, &text))
                    }
                }
            } else {
                IndexNode::Opaque {}
            };
            insert_node(&mut tree, &parts, node);
        }

        let mut root = BTreeMap::new();
        root.insert(root_name, IndexNode::Dir(tree));
        Ok(RepositoryIndex { root })
    }

    /// The repository directory name the root is keyed by.
    pub fn root_name(&self) -> Option<&str> {
        self.root.keys().next().map(String::as_str)
    }

    fn root_dir(&self) -> Option<&BTreeMap<String, IndexNode>> {
        match self.root.values().next() {
            Some(IndexNode::Dir(map)) => Some(map),
            _ => None,
        }
    }

    /// Navigate to a node by repository-relative path (`a/b/c.py`).
    pub fn node(&self, file: &str) -> Option<&IndexNode> {
        let mut current = self.root_dir()?;
        let mut parts = file.split('/').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            let node = current.get(part)?;
            if parts.peek().is_none() {
                return Some(node);
            }
            match node {
                IndexNode::Dir(map) => current = map,
                _ => return None,
            }
        }
        None
    }

    /// Structural record for a source file, if the path names one.
    pub fn module(&self, file: &str) -> Option<&ModuleIndex> {
        match self.node(file)? {
            IndexNode::Module(module) => Some(module),
            _ => None,
        }
    }

    pub fn contains_file(&self, file: &str) -> bool {
        match self.node(file) {
            Some(IndexNode::Module(_)) | Some(IndexNode::Opaque {}) => true,
            // Opaque markers come back from serde as empty dirs.
            Some(IndexNode::Dir(map)) => map.is_empty(),
            None => false,
        }
    }
}

fn insert_node(tree: &mut BTreeMap<String, IndexNode>, parts: &[String], node: IndexNode) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        // Directories may already exist from an earlier child insertion.
        if let (IndexNode::Dir(_), Some(IndexNode::Dir(_))) = (&node, tree.get(head)) {
            return;
        }
        tree.insert(head.clone(), node);
        return;
    }
    let entry = tree
        .entry(head.clone())
        .or_insert_with(|| IndexNode::Dir(BTreeMap::new()));
    if let IndexNode::Dir(map) = entry {
        insert_node(map, rest, node);
    }
}
