//! The document-declared hierarchy, rebuilt from `children_files` links.
//!
//! [`StructureBuilder`] walks the links with an explicit stack whose frames
//! are exactly the current path, so a file that is already on the path is a
//! cycle while a file reached again through a sibling branch is not. Two
//! caches sit in front of the filesystem:
//!
//! * a session cache, alive for one `build` call, so a file shared by two
//!   parents is only assembled once;
//! * a persistent cache keyed by path and validated by mtime, so unchanged
//!   files are never re-read across builds.
//!
//! [`StructureView`] decides what to build from the active document and
//! schedules debounced rebuilds when documents change underneath it.

use crate::debounce::Debouncer;
use crate::format::{file_stem_title, parse_frontmatter, resolve_title, split_frontmatter};
use crate::frontmatter::FrontmatterStore;
use crate::fs::DocumentFs;
use crate::subject::{Subject, SubscriptionId};
use crate::types::{DocumentEvent, DocumentEventKind, StructureNode};
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_STRUCTURE_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
struct CachedStructure {
    node: StructureNode,
    mtime: SystemTime,
}

/// A document being expanded: its own data plus the children built so far
struct Frame {
    file: String,
    mtime: SystemTime,
    title: String,
    children_files: Vec<String>,
    next: usize,
    built: Vec<StructureNode>,
}

enum Step {
    Done(StructureNode),
    Descend(Frame),
}

pub struct StructureBuilder {
    fs: Arc<dyn DocumentFs>,
    root: PathBuf,
    persistent: HashMap<String, CachedStructure>,
}

impl StructureBuilder {
    pub fn new(fs: Arc<dyn DocumentFs>, root: impl AsRef<Path>) -> Self {
        Self {
            fs,
            root: root.as_ref().to_path_buf(),
            persistent: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the hierarchy below `file` (relative to the document root).
    ///
    /// Never fails: unreadable documents and cycles become error nodes.
    pub fn build(&mut self, file: &str) -> StructureNode {
        let mut session: HashMap<String, StructureNode> = HashMap::new();

        let mut stack = match self.enter(file, &[], &mut session) {
            Step::Done(node) => return node,
            Step::Descend(frame) => vec![frame],
        };

        while let Some(top) = stack.last_mut() {
            if let Some(child) = top.children_files.get(top.next).cloned() {
                top.next += 1;
                match self.enter(&child, &stack, &mut session) {
                    Step::Done(node) => {
                        if let Some(parent) = stack.last_mut() {
                            parent.built.push(node);
                        }
                    }
                    Step::Descend(frame) => stack.push(frame),
                }
                continue;
            }

            let Some(frame) = stack.pop() else { break };
            let node = self.finish(frame, &mut session);
            match stack.last_mut() {
                Some(parent) => parent.built.push(node),
                None => return node,
            }
        }

        StructureNode::error(file, file_stem_title(file), format!("No structure for {}", file))
    }

    fn enter(
        &self,
        file: &str,
        path: &[Frame],
        session: &mut HashMap<String, StructureNode>,
    ) -> Step {
        if let Some(node) = session.get(file) {
            return Step::Done(node.clone());
        }

        let full = self.root.join(file);
        let mtime = match self.fs.modified(&full) {
            Ok(mtime) => mtime,
            Err(e) => {
                tracing::debug!(file, error = %e, "structure document missing");
                return Step::Done(StructureNode::error(
                    file,
                    file_stem_title(file),
                    format!("Cannot read {}: {}", file, e),
                ));
            }
        };

        if let Some(cached) = self.persistent.get(file) {
            if cached.mtime == mtime {
                session.insert(file.to_string(), cached.node.clone());
                return Step::Done(cached.node.clone());
            }
        }

        if path.iter().any(|frame| frame.file == file) {
            tracing::warn!(file, "cycle in children_files links");
            return Step::Done(StructureNode::error(
                file,
                file_stem_title(file),
                format!("Cycle detected: {} is its own ancestor", file),
            ));
        }

        let content = match self.fs.read_to_string(&full) {
            Ok(content) => content,
            Err(e) => {
                return Step::Done(StructureNode::error(
                    file,
                    file_stem_title(file),
                    format!("Cannot read {}: {}", file, e),
                ))
            }
        };

        let children_files = split_frontmatter(&content)
            .and_then(|(yaml, _)| parse_frontmatter(yaml).ok())
            .map(|fm| fm.children_files)
            .unwrap_or_default();

        Step::Descend(Frame {
            file: file.to_string(),
            mtime,
            title: resolve_title(&content, file),
            children_files,
            next: 0,
            built: Vec::new(),
        })
    }

    fn finish(&mut self, frame: Frame, session: &mut HashMap<String, StructureNode>) -> StructureNode {
        let node = StructureNode {
            file_path: frame.file.clone(),
            title: frame.title,
            children: frame.built,
            has_error: false,
            error_message: None,
        };
        session.insert(frame.file.clone(), node.clone());
        self.persistent.insert(
            frame.file,
            CachedStructure {
                node: node.clone(),
                mtime: frame.mtime,
            },
        );
        node
    }

    /// Drop `file` and every cached subtree that contains it.
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, file: &str) -> usize {
        let before = self.persistent.len();
        self.persistent
            .retain(|key, cached| key != file && !cached.node.references(file));
        before - self.persistent.len()
    }

    pub fn clear(&mut self) {
        self.persistent.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.persistent.len()
    }

    pub fn is_cached(&self, file: &str) -> bool {
        self.persistent.contains_key(file)
    }
}

/// What the structure panel shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureState {
    /// No document root is configured
    Unconfigured,
    /// The active document has no `root_file`; carries a hint for the user
    Placeholder(String),
    Tree(StructureNode),
}

struct Workspace {
    builder: StructureBuilder,
    frontmatter: Box<dyn FrontmatterStore>,
}

/// Keeps the structure of the active document current
pub struct StructureView {
    workspace: Option<Workspace>,
    active: Option<String>,
    active_root: Option<String>,
    state: StructureState,
    debouncer: Debouncer,
    updates: Subject<StructureState>,
}

impl StructureView {
    pub fn new(
        builder: StructureBuilder,
        frontmatter: Box<dyn FrontmatterStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            workspace: Some(Workspace {
                builder,
                frontmatter,
            }),
            active: None,
            active_root: None,
            state: StructureState::Placeholder(no_document_hint()),
            debouncer: Debouncer::new(debounce),
            updates: Subject::new(),
        }
    }

    /// A view with no document root; every activation shows `Unconfigured`
    pub fn unconfigured(debounce: Duration) -> Self {
        Self {
            workspace: None,
            active: None,
            active_root: None,
            state: StructureState::Unconfigured,
            debouncer: Debouncer::new(debounce),
            updates: Subject::new(),
        }
    }

    pub fn state(&self) -> &StructureState {
        &self.state
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn builder(&self) -> Option<&StructureBuilder> {
        self.workspace.as_ref().map(|ws| &ws.builder)
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&StructureState) + 'static) -> SubscriptionId {
        self.updates.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.updates.unsubscribe(id)
    }

    /// Make `doc` the active document and build its structure
    pub fn activate(&mut self, doc: &str) -> &StructureState {
        self.active = Some(doc.to_string());
        self.debouncer.cancel();

        let (state, active_root) = match self.workspace.as_mut() {
            None => (StructureState::Unconfigured, None),
            Some(ws) => match ws.frontmatter.read_frontmatter(doc) {
                Ok(Some(fm)) => match fm.root_file {
                    Some(root_file) => {
                        let tree = ws.builder.build(&root_file);
                        (StructureState::Tree(tree), Some(root_file))
                    }
                    None => (StructureState::Placeholder(missing_root_hint(doc)), None),
                },
                Ok(None) => (StructureState::Placeholder(missing_root_hint(doc)), None),
                Err(e) => (
                    StructureState::Placeholder(format!("Cannot read {}: {:#}", doc, e)),
                    None,
                ),
            },
        };

        self.active_root = active_root;
        self.state = state;
        self.updates.emit(&self.state);
        &self.state
    }

    /// Invalidate caches for a changed document and arm a rebuild when the
    /// structure on screen depends on it. Returns whether a rebuild is pending.
    pub fn on_document_event(&mut self, event: &DocumentEvent, now: Instant) -> bool {
        let Some(ws) = self.workspace.as_mut() else {
            return false;
        };
        let removed = ws.builder.invalidate(&event.path);
        tracing::debug!(path = %event.path, kind = %event.kind, removed, "structure cache invalidated");

        let mut linked = false;
        if event.kind == DocumentEventKind::Created {
            match self.on_document_created(&event.path) {
                Ok(changed) => linked = changed,
                Err(e) => {
                    tracing::warn!(path = %event.path, error = %format!("{:#}", e), "failed to link new document")
                }
            }
        }

        let relevant = linked
            || self.active.as_deref() == Some(event.path.as_str())
            || self.active_root.as_deref() == Some(event.path.as_str())
            || matches!(&self.state, StructureState::Tree(tree) if tree.references(&event.path));

        if relevant {
            self.debouncer.trigger(now);
            tracing::debug!(path = %event.path, "structure rebuild scheduled");
        }
        self.debouncer.is_pending()
    }

    /// Keep links symmetric for a newly created document.
    ///
    /// A document that names a `parent_file` is added to that parent's
    /// `children_files`. An unlinked document created while a structured
    /// document is active becomes a child of the active document.
    pub fn on_document_created(&mut self, path: &str) -> Result<bool> {
        let Some(ws) = self.workspace.as_mut() else {
            return Ok(false);
        };
        let frontmatter = ws.frontmatter.read_frontmatter(path)?.unwrap_or_default();

        if let Some(parent) = frontmatter.parent_file.as_deref() {
            let added = ws.frontmatter.add_child_to_parent(path, parent)?;
            if added {
                ws.builder.invalidate(parent);
            }
            return Ok(added);
        }
        if frontmatter.root_file.is_some() {
            return Ok(false);
        }

        match (self.active.as_deref(), self.active_root.as_deref()) {
            (Some(active), Some(active_root)) if active != path && active_root != path => {
                let set = ws.frontmatter.set_parent_file(path, active)?;
                let added = ws.frontmatter.add_child_to_parent(path, active)?;
                if set || added {
                    ws.builder.invalidate(path);
                    ws.builder.invalidate(active);
                }
                Ok(set || added)
            }
            _ => Ok(false),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Rebuild if the debounce window has closed. Returns whether it did.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.debouncer.fire_if_due(now) {
            return false;
        }
        self.rebuild();
        true
    }

    /// Drop the persistent cache and rebuild from scratch
    pub fn hard_refresh(&mut self) -> &StructureState {
        if let Some(ws) = self.workspace.as_mut() {
            ws.builder.clear();
        }
        self.rebuild()
    }

    fn rebuild(&mut self) -> &StructureState {
        match self.active.clone() {
            Some(doc) => self.activate(&doc),
            None => &self.state,
        }
    }
}

fn no_document_hint() -> String {
    "Open a document to see its structure".to_string()
}

fn missing_root_hint(doc: &str) -> String {
    format!(
        "{} has no root_file; add `root_file: <path>` to its frontmatter to show a structure",
        doc
    )
}
