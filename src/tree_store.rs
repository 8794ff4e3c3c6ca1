//! Persistent storage of the curated forest and the structural primitives
//! every mutation is built from.

use crate::fs::write_atomic;
use crate::ids::generate_node_id;
use crate::lock::StateLock;
use crate::types::{Node, TreeData};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the tree store inside the state directory
pub const TREE_FILE: &str = "tree.json";

/// Errors emitted by [`TreeStore`] and the forest primitives
#[derive(Debug, Error)]
pub enum TreeStoreError {
    #[error("tree store IO error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize tree: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to lock state directory: {0}")]
    Lock(String),
    #[error("tree was saved by another writer (loaded revision {loaded}, found {on_disk}); reload and retry")]
    Conflict { loaded: u64, on_disk: u64 },
    #[error("node id {0} already exists in the tree")]
    DuplicateId(String),
    #[error("parent node {0} not found")]
    ParentNotFound(String),
}

/// JSON-backed store for [`TreeData`]
#[derive(Debug, Clone)]
pub struct TreeStore {
    path: PathBuf,
}

impl TreeStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store located at `<state_dir>/tree.json`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(TREE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Load the forest. A missing, empty or corrupt file yields an empty
    /// forest; duplicated or empty ids are replaced with fresh ones.
    pub fn load(&self) -> TreeData {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no tree file, starting empty");
                return TreeData::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read tree file, starting empty");
                return TreeData::default();
            }
        };

        if content.trim().is_empty() {
            return TreeData::default();
        }

        match serde_json::from_str::<TreeData>(&content) {
            Ok(mut tree) => {
                let repaired = repair_ids(&mut tree);
                if repaired > 0 {
                    tracing::warn!(path = %self.path.display(), repaired, "reassigned duplicate node ids");
                }
                tree
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt tree file, starting empty");
                // Keep the on-disk revision so the next save replaces the file
                TreeData {
                    revision: parse_revision(&content).unwrap_or(0),
                    ..TreeData::default()
                }
            }
        }
    }

    /// Persist the forest.
    ///
    /// Fails with [`TreeStoreError::Conflict`] when the file was saved by
    /// someone else since `tree` was loaded. On success `tree.revision` is
    /// advanced; on any failure `tree` is left exactly as it was.
    pub fn save(&self, tree: &mut TreeData) -> Result<(), TreeStoreError> {
        let _lock = StateLock::acquire(self.state_dir())
            .map_err(|e| TreeStoreError::Lock(format!("{:#}", e)))?;

        if let Some(on_disk) = self.read_revision() {
            if on_disk != tree.revision {
                return Err(TreeStoreError::Conflict {
                    loaded: tree.revision,
                    on_disk,
                });
            }
        }

        let loaded = tree.revision;
        tree.revision = loaded + 1;
        let result = serde_json::to_vec_pretty(tree)
            .map_err(TreeStoreError::from)
            .and_then(|payload| write_atomic(&self.path, &payload).map_err(TreeStoreError::from));

        match result {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), revision = tree.revision, "saved tree");
                Ok(())
            }
            Err(e) => {
                tree.revision = loaded;
                Err(e)
            }
        }
    }

    /// Revision currently on disk, or `None` when the file is absent or unreadable
    fn read_revision(&self) -> Option<u64> {
        let content = fs::read_to_string(&self.path).ok()?;
        parse_revision(&content)
    }
}

/// The `revision` field of a tree file, readable even when the rest of the
/// document does not match the schema
fn parse_revision(content: &str) -> Option<u64> {
    #[derive(Deserialize)]
    struct RevisionOnly {
        #[serde(default)]
        revision: u64,
    }

    serde_json::from_str::<RevisionOnly>(content)
        .ok()
        .map(|r| r.revision)
}

impl TreeData {
    /// Depth-first lookup
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        find_in(&self.root_nodes, id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        find_in_mut(&mut self.root_nodes, id)
    }

    /// First node (depth-first) referencing `file_path`
    pub fn find_by_path(&self, file_path: &str) -> Option<&Node> {
        fn search<'a>(nodes: &'a [Node], file_path: &str) -> Option<&'a Node> {
            for node in nodes {
                if node.file_path == file_path {
                    return Some(node);
                }
                if let Some(found) = search(&node.children, file_path) {
                    return Some(found);
                }
            }
            None
        }
        search(&self.root_nodes, file_path)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.find_node(id).is_some()
    }

    /// Detach the node with `id`, subtree intact, from whichever list holds it
    pub fn remove_and_return(&mut self, id: &str) -> Option<Node> {
        remove_from(&mut self.root_nodes, id)
    }

    /// Put `node` in front of `parent`'s children (expanding the parent), or
    /// in front of the root list when `parent` is `None`.
    ///
    /// Every id in the inserted subtree must be new to the forest.
    pub fn insert_as_first_child(
        &mut self,
        node: Node,
        parent: Option<&str>,
    ) -> Result<(), TreeStoreError> {
        let existing = self.all_ids();
        if let Some(dup) = node.subtree_ids().into_iter().find(|id| existing.contains(id)) {
            return Err(TreeStoreError::DuplicateId(dup));
        }

        match parent {
            None => self.root_nodes.insert(0, node),
            Some(parent_id) => {
                let parent = self
                    .find_node_mut(parent_id)
                    .ok_or_else(|| TreeStoreError::ParentNotFound(parent_id.to_string()))?;
                parent.children.insert(0, node);
                parent.expanded = true;
            }
        }
        Ok(())
    }

    /// Set the expanded flag; returns whether it actually changed
    pub fn set_expanded(&mut self, id: &str, expanded: bool) -> bool {
        match self.find_node_mut(id) {
            Some(node) if node.expanded != expanded => {
                node.expanded = expanded;
                true
            }
            _ => false,
        }
    }

    /// Chain of ancestors from the forest root down to the direct parent.
    /// Empty for root nodes and for unknown ids.
    pub fn ancestors(&self, id: &str) -> Vec<&Node> {
        fn path_to<'a>(nodes: &'a [Node], id: &str, path: &mut Vec<&'a Node>) -> bool {
            for node in nodes {
                if node.id == id {
                    return true;
                }
                path.push(node);
                if path_to(&node.children, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        if path_to(&self.root_nodes, id, &mut path) {
            path
        } else {
            Vec::new()
        }
    }

    /// Whether `candidate` is `ancestor` itself or lies in its subtree.
    /// Walks top-down from `ancestor`; unknown ancestors contain nothing.
    pub fn contains_in_subtree(&self, ancestor: &str, candidate: &str) -> bool {
        self.find_node(ancestor)
            .is_some_and(|node| find_in(std::slice::from_ref(node), candidate).is_some())
    }

    pub fn node_count(&self) -> usize {
        self.root_nodes.iter().map(Node::subtree_len).sum()
    }

    pub fn all_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for root in &self.root_nodes {
            root.walk(&mut |node| {
                ids.insert(node.id.clone());
            });
        }
        ids
    }
}

fn find_in<'a>(nodes: &'a [Node], id: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_in(&node.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(nodes: &'a mut [Node], id: &str) -> Option<&'a mut Node> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_in_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

fn remove_from(nodes: &mut Vec<Node>, id: &str) -> Option<Node> {
    for i in 0..nodes.len() {
        if nodes[i].id == id {
            return Some(nodes.remove(i));
        }
        if let Some(found) = remove_from(&mut nodes[i].children, id) {
            return Some(found);
        }
    }
    None
}

fn for_each_mut(nodes: &mut [Node], visit: &mut impl FnMut(&mut Node)) {
    for node in nodes {
        visit(node);
        for_each_mut(&mut node.children, visit);
    }
}

/// Give every empty or repeated id a fresh one, keeping the first occurrence
fn repair_ids(tree: &mut TreeData) -> usize {
    let mut taken = tree.all_ids();
    let existing = taken.len();
    let mut seen = HashSet::new();
    let mut repaired = 0;
    let now = Utc::now();

    for_each_mut(&mut tree.root_nodes, &mut |node| {
        if !node.id.is_empty() && seen.insert(node.id.clone()) {
            return;
        }
        match generate_node_id(&node.file_path, now, existing, |c| taken.contains(c)) {
            Ok(fresh) => {
                taken.insert(fresh.clone());
                seen.insert(fresh.clone());
                node.id = fresh;
                repaired += 1;
            }
            Err(e) => tracing::warn!(error = %e, "could not repair node id"),
        }
    });
    repaired
}
