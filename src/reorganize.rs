//! Every mutation of the persisted tree and focus list goes through here.
//!
//! Each operation is one load, an in-memory edit, and at most one save.
//! Items of a drop are validated one by one; a rejected item is reported
//! and skipped while the rest of the gesture still applies.

use crate::focus::{FocusStore, FocusStoreError};
use crate::format::is_document_path;
use crate::fs::relative_to_root;
use crate::ids::generate_node_id;
use crate::tree_store::{TreeStore, TreeStoreError};
use crate::types::{Node, TreeData, ViewKind, ViewNodeId};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DropError {
    #[error("drop target {0} no longer exists")]
    TargetMissing(String),
    #[error("items dropped in the focused view need a target node")]
    FocusedRootDrop,
    #[error("node {0} not found")]
    NodeNotFound(String),
    #[error(transparent)]
    Store(#[from] TreeStoreError),
    #[error(transparent)]
    Focus(#[from] FocusStoreError),
}

/// What is being dragged, tagged by where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPayload {
    /// Canonical node ids from the overview
    Overview(Vec<String>),
    /// Namespaced ids from the focused view
    Focused(Vec<ViewNodeId>),
    /// Untracked documents
    Isolated(Vec<PathBuf>),
    /// Entries of the recent view
    Recent(Vec<PathBuf>),
    /// Files dropped from outside the tool
    External(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedNode {
    pub id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedItem {
    pub item: String,
    pub reason: String,
}

/// Outcome of one drop gesture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub moved: Vec<String>,
    pub created: Vec<CreatedNode>,
    pub rejected: Vec<RejectedItem>,
}

impl DropReport {
    /// Whether anything was accepted (and therefore saved)
    pub fn changed(&self) -> bool {
        !self.moved.is_empty() || !self.created.is_empty()
    }

    fn reject(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        let item = item.into();
        let reason = reason.into();
        tracing::warn!(item = %item, reason = %reason, "drop item rejected");
        self.rejected.push(RejectedItem { item, reason });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Disassociation {
    /// The node and `removed - 1` descendants were dropped from the tree
    Removed { removed: usize },
    /// Nothing changed; the node has children and removal was not confirmed
    NeedsConfirmation { descendants: usize },
}

pub struct Reorganizer {
    tree_store: TreeStore,
    focus_store: FocusStore,
    document_root: Option<PathBuf>,
}

impl Reorganizer {
    pub fn new(tree_store: TreeStore, focus_store: FocusStore, document_root: Option<PathBuf>) -> Self {
        let document_root = document_root.map(|root| root.canonicalize().unwrap_or(root));
        Self {
            tree_store,
            focus_store,
            document_root,
        }
    }

    pub fn tree_store(&self) -> &TreeStore {
        &self.tree_store
    }

    pub fn focus_store(&self) -> &FocusStore {
        &self.focus_store
    }

    /// Apply a drop gesture onto `target` (or the forest root when `None`)
    pub fn handle_drop(
        &self,
        view: ViewKind,
        target: Option<&ViewNodeId>,
        payload: &DropPayload,
    ) -> Result<DropReport, DropError> {
        if view == ViewKind::Focused && target.is_none() {
            tracing::warn!("rejecting drop onto the focused view root");
            return Err(DropError::FocusedRootDrop);
        }

        let mut tree = self.tree_store.load();
        let target = target.map(|t| t.canonical_id().to_string());
        if let Some(target) = &target {
            if !tree.contains_id(target) {
                return Err(DropError::TargetMissing(target.clone()));
            }
        }
        let target = target.as_deref();

        let mut report = DropReport::default();
        match payload {
            DropPayload::Overview(ids) => {
                for id in ids {
                    move_existing(&mut tree, id, target, &mut report)?;
                }
            }
            DropPayload::Focused(ids) => {
                for view_id in ids {
                    if view_id.is_focus_root() {
                        report.reject(
                            view_id.to_key(),
                            "focus roots are reordered through the focus list",
                        );
                        continue;
                    }
                    move_existing(&mut tree, view_id.canonical_id(), target, &mut report)?;
                }
            }
            DropPayload::Isolated(files) | DropPayload::Recent(files) | DropPayload::External(files) => {
                for file in files {
                    self.add_file(&mut tree, file, target, &mut report)?;
                }
            }
        }

        if report.changed() {
            self.tree_store.save(&mut tree)?;
        }
        Ok(report)
    }

    /// Overview drop of canonical ids
    pub fn move_nodes(&self, ids: &[String], target: Option<&str>) -> Result<DropReport, DropError> {
        let target = target.map(ViewNodeId::canonical);
        self.handle_drop(
            ViewKind::Overview,
            target.as_ref(),
            &DropPayload::Overview(ids.to_vec()),
        )
    }

    fn add_file(
        &self,
        tree: &mut TreeData,
        file: &Path,
        target: Option<&str>,
        report: &mut DropReport,
    ) -> Result<(), DropError> {
        let item = file.display().to_string();
        let Some(root) = self.document_root.as_deref() else {
            report.reject(item, "no document root is configured");
            return Ok(());
        };
        if !is_document_path(file) {
            report.reject(item, "not a markdown document");
            return Ok(());
        }
        let absolute = if file.is_relative() {
            root.join(file)
        } else {
            file.to_path_buf()
        };
        let Ok(absolute) = absolute.canonicalize() else {
            report.reject(item, "file does not exist");
            return Ok(());
        };
        let Some(rel) = relative_to_root(root, &absolute) else {
            report.reject(item, "file is outside the document root");
            return Ok(());
        };

        if let Some(existing) = tree.find_by_path(&rel).map(|n| n.id.clone()) {
            return move_existing(tree, &existing, target, report);
        }

        let id = match generate_node_id(&rel, Utc::now(), tree.node_count(), |c| tree.contains_id(c)) {
            Ok(id) => id,
            Err(e) => {
                report.reject(item, e.to_string());
                return Ok(());
            }
        };
        tree.insert_as_first_child(Node::new(id.clone(), rel.clone()), target)?;
        tracing::debug!(id = %id, file = %rel, "added document to tree");
        report.created.push(CreatedNode { id, file_path: rel });
        Ok(())
    }

    /// Expand or collapse a node; `None` flips it. Saves only on change.
    pub fn toggle_expanded(&self, id: &str, value: Option<bool>) -> Result<bool, DropError> {
        let mut tree = self.tree_store.load();
        let current = tree
            .find_node(id)
            .map(|n| n.expanded)
            .ok_or_else(|| DropError::NodeNotFound(id.to_string()))?;
        if !tree.set_expanded(id, value.unwrap_or(!current)) {
            return Ok(false);
        }
        self.tree_store.save(&mut tree)?;
        Ok(true)
    }

    /// Remove a node and its subtree from the tree. Documents are untouched.
    pub fn disassociate(&self, id: &str, confirmed: bool) -> Result<Disassociation, DropError> {
        let mut tree = self.tree_store.load();
        let size = tree
            .find_node(id)
            .map(Node::subtree_len)
            .ok_or_else(|| DropError::NodeNotFound(id.to_string()))?;

        if size > 1 && !confirmed {
            return Ok(Disassociation::NeedsConfirmation {
                descendants: size - 1,
            });
        }
        tree.remove_and_return(id);
        self.tree_store.save(&mut tree)?;
        Ok(Disassociation::Removed { removed: size })
    }

    /// Pin a node as a focus root
    pub fn add_focus(&self, id: &str) -> Result<bool, DropError> {
        self.require_node(id)?;
        Ok(self.focus_store.update(|focus| focus.add(id))?)
    }

    pub fn remove_focus(&self, id: &str) -> Result<bool, DropError> {
        Ok(self.focus_store.update(|focus| focus.remove(id))?)
    }

    /// Move an existing focus root to the top of the focused view
    pub fn promote_focus(&self, id: &str) -> Result<bool, DropError> {
        Ok(self.focus_store.update(|focus| focus.move_to_front(id))?)
    }

    fn require_node(&self, id: &str) -> Result<(), DropError> {
        if self.tree_store.load().contains_id(id) {
            Ok(())
        } else {
            Err(DropError::NodeNotFound(id.to_string()))
        }
    }
}

/// Re-parent one existing node under `target`, refusing cycles
fn move_existing(
    tree: &mut TreeData,
    id: &str,
    target: Option<&str>,
    report: &mut DropReport,
) -> Result<(), DropError> {
    if !tree.contains_id(id) {
        report.reject(id, "node not found");
        return Ok(());
    }
    if let Some(target) = target {
        if tree.contains_in_subtree(id, target) {
            report.reject(id, "cannot move a node into itself or its descendants");
            return Ok(());
        }
    }
    if let Some(node) = tree.remove_and_return(id) {
        tree.insert_as_first_child(node, target)?;
        report.moved.push(id.to_string());
    }
    Ok(())
}
