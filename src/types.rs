use serde::{Deserialize, Serialize};
use std::fmt;

/// Current on-disk format version for the tree and focus files
pub const FORMAT_VERSION: &str = "1";

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A reference to one document inside the curated tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    /// Path relative to the document root
    pub file_path: String,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub expanded: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            children: Vec::new(),
            expanded: false,
        }
    }

    /// Builder-style helper used mostly by tests and fixtures
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Number of nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Node::subtree_len).sum::<usize>()
    }

    /// Visit every node of the subtree in depth-first pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// All ids contained in this subtree, in pre-order
    pub fn subtree_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.walk(&mut |node| ids.push(node.id.clone()));
        ids
    }
}

/// The persisted curated forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeData {
    #[serde(default = "default_version", alias = "formatVersion")]
    pub version: String,
    /// Bumped on every successful save; used to detect concurrent writers
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub root_nodes: Vec<Node>,
}

impl Default for TreeData {
    fn default() -> Self {
        Self {
            version: default_version(),
            revision: 0,
            root_nodes: Vec::new(),
        }
    }
}

/// The persisted list of pinned focus roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusData {
    #[serde(default = "default_version", alias = "formatVersion")]
    pub version: String,
    #[serde(default)]
    pub focus_list: Vec<String>,
}

impl Default for FocusData {
    fn default() -> Self {
        Self {
            version: default_version(),
            focus_list: Vec::new(),
        }
    }
}

/// Identity of a node as displayed by one view.
///
/// The focused view materialises a copy of every focus root's subtree, so the
/// same canonical node can be shown several times. Each copy gets its own
/// identity; `canonical_id` recovers the node it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewNodeId {
    /// A node as it appears in the canonical tree
    Canonical { id: String },
    /// A copy of `node` shown inside the subtree of focus root `root`
    Focused { node: String, root: String },
    /// The top-level entry materialised for a focus root
    FocusRoot { root: String },
}

impl ViewNodeId {
    pub fn canonical(id: impl Into<String>) -> Self {
        ViewNodeId::Canonical { id: id.into() }
    }

    pub fn focused(node: impl Into<String>, root: impl Into<String>) -> Self {
        ViewNodeId::Focused {
            node: node.into(),
            root: root.into(),
        }
    }

    pub fn focus_root(root: impl Into<String>) -> Self {
        ViewNodeId::FocusRoot { root: root.into() }
    }

    /// The id of the tree node this view identity refers to
    pub fn canonical_id(&self) -> &str {
        match self {
            ViewNodeId::Canonical { id } => id,
            ViewNodeId::Focused { node, .. } => node,
            ViewNodeId::FocusRoot { root } => root,
        }
    }

    /// The focus root this copy belongs to, if any
    pub fn focus_root_id(&self) -> Option<&str> {
        match self {
            ViewNodeId::Canonical { .. } => None,
            ViewNodeId::Focused { root, .. } | ViewNodeId::FocusRoot { root } => Some(root),
        }
    }

    pub fn is_focus_root(&self) -> bool {
        matches!(self, ViewNodeId::FocusRoot { .. })
    }

    /// Stable string key, unique per identity.
    ///
    /// Format: `c:<id>`, `r:<root>`, or `f:<root byte len>:<root>:<node>`.
    pub fn to_key(&self) -> String {
        match self {
            ViewNodeId::Canonical { id } => format!("c:{}", id),
            ViewNodeId::FocusRoot { root } => format!("r:{}", root),
            ViewNodeId::Focused { node, root } => format!("f:{}:{}:{}", root.len(), root, node),
        }
    }

    /// Parse a key produced by `to_key`. A string without a known prefix is
    /// taken as a bare canonical id.
    pub fn parse_key(key: &str) -> Self {
        if let Some(id) = key.strip_prefix("c:") {
            return ViewNodeId::canonical(id);
        }
        if let Some(root) = key.strip_prefix("r:") {
            return ViewNodeId::focus_root(root);
        }
        if let Some(rest) = key.strip_prefix("f:") {
            if let Some(parsed) = parse_focused_key(rest) {
                return parsed;
            }
        }
        ViewNodeId::canonical(key)
    }
}

fn parse_focused_key(rest: &str) -> Option<ViewNodeId> {
    let (len_str, tail) = rest.split_once(':')?;
    let root_len: usize = len_str.parse().ok()?;
    if !tail.is_char_boundary(root_len) || tail.len() < root_len + 1 {
        return None;
    }
    let (root, node_part) = tail.split_at(root_len);
    let node = node_part.strip_prefix(':')?;
    Some(ViewNodeId::focused(node, root))
}

impl fmt::Display for ViewNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// A node copy produced by the focused projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewNode {
    pub id: ViewNodeId,
    pub file_path: String,
    pub expanded: bool,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    /// Wrap a canonical node without changing its identity
    pub fn from_canonical(node: &Node) -> Self {
        Self {
            id: ViewNodeId::canonical(node.id.clone()),
            file_path: node.file_path.clone(),
            expanded: node.expanded,
            children: node.children.iter().map(ViewNode::from_canonical).collect(),
        }
    }
}

/// A node of the frontmatter-declared hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureNode {
    pub file_path: String,
    pub title: String,
    pub children: Vec<StructureNode>,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StructureNode {
    /// A terminal node flagged with an error
    pub fn error(file_path: impl Into<String>, title: impl Into<String>, message: String) -> Self {
        Self {
            file_path: file_path.into(),
            title: title.into(),
            children: Vec::new(),
            has_error: true,
            error_message: Some(message),
        }
    }

    /// Whether `file_path` appears anywhere in this subtree
    pub fn references(&self, file_path: &str) -> bool {
        self.file_path == file_path || self.children.iter().any(|c| c.references(file_path))
    }

    /// Count error nodes in this subtree
    pub fn error_count(&self) -> usize {
        usize::from(self.has_error) + self.children.iter().map(StructureNode::error_count).sum::<usize>()
    }
}

/// Kind of change reported by the document watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentEventKind {
    Changed,
    Created,
    Deleted,
}

impl DocumentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentEventKind::Changed => "changed",
            DocumentEventKind::Created => "created",
            DocumentEventKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DocumentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change to one document, with its path relative to the document root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub path: String,
    pub kind: DocumentEventKind,
}

impl DocumentEvent {
    pub fn new(path: impl Into<String>, kind: DocumentEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Which view a drag or drop happens in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Overview,
    Focused,
    Recent,
    Isolated,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Overview => "overview",
            ViewKind::Focused => "focused",
            ViewKind::Recent => "recent",
            ViewKind::Isolated => "isolated",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ViewKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overview" => Ok(ViewKind::Overview),
            "focused" => Ok(ViewKind::Focused),
            "recent" => Ok(ViewKind::Recent),
            "isolated" => Ok(ViewKind::Isolated),
            _ => Err(anyhow::anyhow!(
                "Invalid view: '{}'. Valid values are: overview, focused, recent, isolated",
                s
            )),
        }
    }
}

/// Request sent to every projection after persisted state changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    /// The tree or focus list was saved
    TreeChanged,
    /// Cached titles changed
    TitlesChanged,
    /// Explicit user refresh
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focused_id_strips_back_to_node() {
        let pairs = [("a", "r"), ("n-1", "n-2"), ("x:y", "1:z"), ("", "root"), ("é", "ü")];
        for (id, root) in pairs {
            let view_id = ViewNodeId::focused(id, root);
            assert_eq!(view_id.canonical_id(), id);
            assert_eq!(ViewNodeId::parse_key(&view_id.to_key()), view_id);
        }
    }

    #[test]
    fn test_distinct_pairs_give_distinct_keys() {
        let pairs = [
            ("a", "bc"),
            ("ab", "c"),
            ("a:b", "c"),
            ("a", "b:c"),
            ("b", "a"),
            ("a", "b"),
        ];
        let mut keys = std::collections::HashSet::new();
        for (id, root) in pairs {
            assert!(keys.insert(ViewNodeId::focused(id, root).to_key()));
        }
        // Focus roots never collide with a focused copy of the same node
        assert_ne!(
            ViewNodeId::focus_root("a").to_key(),
            ViewNodeId::focused("a", "a").to_key()
        );
    }

    #[test]
    fn test_bare_key_parses_as_canonical() {
        assert_eq!(ViewNodeId::parse_key("n-7"), ViewNodeId::canonical("n-7"));
        assert_eq!(ViewNodeId::parse_key("f:bogus"), ViewNodeId::canonical("f:bogus"));
        assert_eq!(ViewNodeId::parse_key("f:9:ab:c"), ViewNodeId::canonical("f:9:ab:c"));
    }

    #[test]
    fn test_node_serialization_omits_collapsed_flag() {
        let node = Node::new("n-1", "a.md");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"id":"n-1","filePath":"a.md","children":[]}"#);

        let parsed: Node = serde_json::from_str(r#"{"id":"n-1","filePath":"a.md"}"#).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_tree_data_accepts_format_version_alias() {
        let tree: TreeData =
            serde_json::from_str(r#"{"formatVersion":"1","rootNodes":[]}"#).unwrap();
        assert_eq!(tree, TreeData::default());
    }
}
