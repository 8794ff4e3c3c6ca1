//! Read-only projections of the tree and the document root.
//!
//! Nothing here writes: overview and focused project the loaded forest,
//! while recent and untracked scan the document root directly.

use crate::format::is_document_path;
use crate::fs::relative_to_root;
use crate::title_cache::TitleCache;
use crate::types::{FocusData, Node, TreeData, ViewNode, ViewNodeId};
use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// The forest exactly as stored
pub fn overview(tree: &TreeData) -> &[Node] {
    &tree.root_nodes
}

/// One copy of each focus root's subtree, with every copy given an identity
/// namespaced by its root. Unknown focus ids are skipped.
pub fn focused(tree: &TreeData, focus: &FocusData) -> Vec<ViewNode> {
    focus
        .unique_ids()
        .into_iter()
        .filter_map(|root_id| match tree.find_node(root_id) {
            Some(node) => {
                let mut copy = focused_copy(node, root_id);
                copy.id = ViewNodeId::focus_root(root_id);
                Some(copy)
            }
            None => {
                tracing::debug!(id = root_id, "skipping dangling focus id");
                None
            }
        })
        .collect()
}

fn focused_copy(node: &Node, root: &str) -> ViewNode {
    ViewNode {
        id: ViewNodeId::focused(node.id.clone(), root),
        file_path: node.file_path.clone(),
        expanded: node.expanded,
        children: node.children.iter().map(|c| focused_copy(c, root)).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntry {
    pub file_path: String,
    pub modified: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Local>>,
}

impl RecentEntry {
    fn time(&self, sort: RecentSort) -> DateTime<Local> {
        match sort {
            RecentSort::Modified => self.modified,
            RecentSort::Created => self.created.unwrap_or(self.modified),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecentSort {
    #[default]
    Modified,
    Created,
}

impl std::str::FromStr for RecentSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modified" => Ok(RecentSort::Modified),
            "created" => Ok(RecentSort::Created),
            _ => Err(anyhow::anyhow!(
                "Invalid sort: '{}'. Valid values are: modified, created",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecentGrouping {
    Day,
    Week,
    Month,
}

impl std::str::FromStr for RecentGrouping {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(RecentGrouping::Day),
            "week" => Ok(RecentGrouping::Week),
            "month" => Ok(RecentGrouping::Month),
            _ => Err(anyhow::anyhow!(
                "Invalid grouping: '{}'. Valid values are: day, week, month",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentGroup {
    pub label: String,
    pub entries: Vec<RecentEntry>,
}

/// Every document under `root`, hidden directories excluded, as
/// root-relative paths with their metadata
fn scan_documents(root: &Path) -> Vec<(String, std::fs::Metadata)> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_document_path(entry.path()))
        .filter_map(|entry| {
            let rel = relative_to_root(root, entry.path())?;
            let metadata = entry.metadata().ok()?;
            Some((rel, metadata))
        })
        .collect()
}

/// Documents under `root`, newest first
pub fn recent(root: &Path, sort: RecentSort, limit: Option<usize>) -> Vec<RecentEntry> {
    let mut entries: Vec<RecentEntry> = scan_documents(root)
        .into_iter()
        .filter_map(|(file_path, metadata)| {
            let modified = metadata.modified().ok()?;
            Some(RecentEntry {
                file_path,
                modified: modified.into(),
                created: metadata.created().ok().map(DateTime::<Local>::from),
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.time(sort)
            .cmp(&a.time(sort))
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    entries
}

pub fn group_label(time: DateTime<Local>, grouping: RecentGrouping) -> String {
    match grouping {
        RecentGrouping::Day => time.format("%Y-%m-%d").to_string(),
        RecentGrouping::Week => {
            let week = time.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        RecentGrouping::Month => time.format("%Y-%m").to_string(),
    }
}

/// Bucket already-sorted entries, keeping their order
pub fn group_recent(
    entries: Vec<RecentEntry>,
    grouping: RecentGrouping,
    sort: RecentSort,
) -> Vec<RecentGroup> {
    let mut groups: Vec<RecentGroup> = Vec::new();
    for entry in entries {
        let label = group_label(entry.time(sort), grouping);
        match groups.last_mut() {
            Some(group) if group.label == label => group.entries.push(entry),
            _ => groups.push(RecentGroup {
                label,
                entries: vec![entry],
            }),
        }
    }
    groups
}

/// Documents under `root` that no node references, sorted by path
pub fn untracked(root: &Path, tree: &TreeData) -> Vec<String> {
    let mut tracked = HashSet::new();
    for node in &tree.root_nodes {
        node.walk(&mut |n| {
            tracked.insert(n.file_path.as_str());
        });
    }

    let mut files: Vec<String> = scan_documents(root)
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| !tracked.contains(path.as_str()))
        .collect();
    files.sort();
    files
}

/// One row of a rendered tree view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayItem {
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub depth: usize,
    pub expanded: bool,
    pub has_children: bool,
    pub is_focus_root: bool,
}

/// Flatten the overview into visible rows
pub fn render_overview(tree: &TreeData, titles: &mut TitleCache) -> Vec<DisplayItem> {
    let nodes: Vec<ViewNode> = tree.root_nodes.iter().map(ViewNode::from_canonical).collect();
    let mut rows = Vec::new();
    flatten(&nodes, 0, tree, titles, &mut rows);
    rows
}

/// Flatten the focused view into visible rows; focus roots carry their
/// ancestor breadcrumb as description
pub fn render_focused(
    tree: &TreeData,
    focus: &FocusData,
    titles: &mut TitleCache,
) -> Vec<DisplayItem> {
    let nodes = focused(tree, focus);
    let mut rows = Vec::new();
    flatten(&nodes, 0, tree, titles, &mut rows);
    rows
}

fn flatten(
    nodes: &[ViewNode],
    depth: usize,
    tree: &TreeData,
    titles: &mut TitleCache,
    rows: &mut Vec<DisplayItem>,
) {
    for node in nodes {
        let description = if node.id.is_focus_root() {
            breadcrumb(tree, node.id.canonical_id(), titles)
        } else {
            None
        };
        rows.push(DisplayItem {
            key: node.id.to_key(),
            title: titles.get(&node.file_path),
            description,
            depth,
            expanded: node.expanded,
            has_children: !node.children.is_empty(),
            is_focus_root: node.id.is_focus_root(),
        });
        if node.expanded {
            flatten(&node.children, depth + 1, tree, titles, rows);
        }
    }
}

fn breadcrumb(tree: &TreeData, id: &str, titles: &mut TitleCache) -> Option<String> {
    let ancestors = tree.ancestors(id);
    if ancestors.is_empty() {
        return None;
    }
    let parts: Vec<String> = ancestors.iter().map(|n| titles.get(&n.file_path)).collect();
    Some(parts.join(" / "))
}
