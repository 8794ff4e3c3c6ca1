//! Facade owning the stores, caches and notification subjects.
//!
//! A front end builds one `Engine`, renders rows from it, forwards user
//! gestures to its mutation methods and document events from the watcher,
//! and re-renders whenever a [`RefreshRequest`] is emitted.

use crate::config::{Config, DocumentRootResolver, Workspace};
use crate::focus::FocusStore;
use crate::frontmatter::MarkdownFrontmatter;
use crate::fs::{DocumentFs, StdFs};
use crate::reorganize::{Disassociation, DropError, DropPayload, DropReport, Reorganizer};
use crate::structure::{StructureBuilder, StructureState, StructureView};
use crate::subject::{Subject, SubscriptionId};
use crate::title_cache::TitleCache;
use crate::tree_store::TreeStore;
use crate::types::{DocumentEvent, DocumentEventKind, FocusData, RefreshRequest, TreeData, ViewKind, ViewNodeId};
use crate::views::{self, DisplayItem, RecentEntry, RecentGroup, RecentGrouping, RecentSort};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub struct Engine {
    reorganizer: Reorganizer,
    document_root: Option<PathBuf>,
    titles: TitleCache,
    structure: StructureView,
    refresh: Subject<RefreshRequest>,
    recent_limit: usize,
}

impl Engine {
    /// Engine over an initialized workspace, reading documents from disk
    pub fn open(workspace: &Workspace) -> Self {
        Self::new(
            workspace.tree_store(),
            workspace.focus_store(),
            workspace,
            workspace.config(),
            Arc::new(StdFs),
        )
    }

    pub fn new(
        tree_store: TreeStore,
        focus_store: FocusStore,
        resolver: &dyn DocumentRootResolver,
        config: &Config,
        fs: Arc<dyn DocumentFs>,
    ) -> Self {
        let document_root = resolver.resolve_document_root();

        let structure = match &document_root {
            Some(root) => StructureView::new(
                StructureBuilder::new(Arc::clone(&fs), root),
                Box::new(MarkdownFrontmatter::new(root)),
                config.structure_debounce(),
            ),
            None => StructureView::unconfigured(config.structure_debounce()),
        };

        Self {
            reorganizer: Reorganizer::new(tree_store, focus_store, document_root.clone()),
            titles: TitleCache::new(fs, document_root.clone(), config.title_debounce()),
            document_root,
            structure,
            refresh: Subject::new(),
            recent_limit: config.recent_limit,
        }
    }

    pub fn document_root(&self) -> Option<&Path> {
        self.document_root.as_deref()
    }

    pub fn tree(&self) -> TreeData {
        self.reorganizer.tree_store().load()
    }

    pub fn focus(&self) -> FocusData {
        self.reorganizer.focus_store().read()
    }

    pub fn title(&mut self, path: &str) -> String {
        self.titles.get(path)
    }

    pub fn overview_items(&mut self) -> Vec<DisplayItem> {
        let tree = self.tree();
        views::render_overview(&tree, &mut self.titles)
    }

    pub fn focused_items(&mut self) -> Vec<DisplayItem> {
        let tree = self.tree();
        let focus = self.focus();
        views::render_focused(&tree, &focus, &mut self.titles)
    }

    /// Documents by recency; `limit` defaults to the configured limit
    pub fn recent(&self, sort: RecentSort, limit: Option<usize>) -> Vec<RecentEntry> {
        match &self.document_root {
            Some(root) => views::recent(root, sort, Some(limit.unwrap_or(self.recent_limit))),
            None => Vec::new(),
        }
    }

    pub fn recent_groups(
        &self,
        grouping: RecentGrouping,
        sort: RecentSort,
        limit: Option<usize>,
    ) -> Vec<RecentGroup> {
        views::group_recent(self.recent(sort, limit), grouping, sort)
    }

    pub fn untracked(&self) -> Vec<String> {
        match &self.document_root {
            Some(root) => views::untracked(root, &self.tree()),
            None => Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&RefreshRequest) + 'static) -> SubscriptionId {
        self.refresh.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.refresh.unsubscribe(id)
    }

    /// Overview drop: re-parent `dragged` under `target`
    pub fn move_nodes(
        &mut self,
        dragged: &[ViewNodeId],
        target: Option<&ViewNodeId>,
    ) -> Result<DropReport, DropError> {
        // A focus-root key keeps its view identity so it is rejected per item
        let payload = if dragged.iter().any(ViewNodeId::is_focus_root) {
            DropPayload::Focused(dragged.to_vec())
        } else {
            DropPayload::Overview(dragged.iter().map(|id| id.canonical_id().to_string()).collect())
        };
        self.handle_drop(ViewKind::Overview, target, &payload)
    }

    pub fn handle_drop(
        &mut self,
        view: ViewKind,
        target: Option<&ViewNodeId>,
        payload: &DropPayload,
    ) -> Result<DropReport, DropError> {
        let report = self.reorganizer.handle_drop(view, target, payload)?;
        if report.changed() {
            self.refresh.emit(&RefreshRequest::TreeChanged);
        }
        Ok(report)
    }

    pub fn toggle_expanded(&mut self, id: &ViewNodeId, value: Option<bool>) -> Result<bool, DropError> {
        let changed = self.reorganizer.toggle_expanded(id.canonical_id(), value)?;
        self.notify_if(changed);
        Ok(changed)
    }

    pub fn disassociate(&mut self, id: &ViewNodeId, confirmed: bool) -> Result<Disassociation, DropError> {
        let outcome = self.reorganizer.disassociate(id.canonical_id(), confirmed)?;
        self.notify_if(matches!(outcome, Disassociation::Removed { .. }));
        Ok(outcome)
    }

    pub fn add_focus(&mut self, id: &ViewNodeId) -> Result<bool, DropError> {
        let changed = self.reorganizer.add_focus(id.canonical_id())?;
        self.notify_if(changed);
        Ok(changed)
    }

    pub fn remove_focus(&mut self, id: &ViewNodeId) -> Result<bool, DropError> {
        let changed = self.reorganizer.remove_focus(id.canonical_id())?;
        self.notify_if(changed);
        Ok(changed)
    }

    pub fn promote_focus(&mut self, id: &ViewNodeId) -> Result<bool, DropError> {
        let changed = self.reorganizer.promote_focus(id.canonical_id())?;
        self.notify_if(changed);
        Ok(changed)
    }

    /// Forget every cached title and ask all views to re-render
    pub fn refresh_all(&mut self) {
        self.titles.clear();
        self.refresh.emit(&RefreshRequest::All);
    }

    fn notify_if(&mut self, changed: bool) {
        if changed {
            self.refresh.emit(&RefreshRequest::TreeChanged);
        }
    }

    pub fn structure(&self) -> &StructureView {
        &self.structure
    }

    pub fn structure_mut(&mut self) -> &mut StructureView {
        &mut self.structure
    }

    pub fn activate(&mut self, doc: &str) -> &StructureState {
        self.structure.activate(doc)
    }

    /// Feed one watcher event to the caches and the structure view.
    ///
    /// Changed titles are picked up through the mtime check on the next
    /// render; only deleted documents are evicted.
    pub fn on_document_event(&mut self, event: &DocumentEvent, now: Instant) {
        if event.kind == DocumentEventKind::Deleted {
            self.titles.invalidate(&event.path);
        }
        self.structure.on_document_event(event, now);
    }

    /// Earliest pending debounce deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.titles.next_deadline(), self.structure.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever debounced work is due. Returns whether anything ran.
    pub fn poll(&mut self, now: Instant) -> bool {
        let titles = self.titles.poll_notifications(now);
        if titles {
            self.refresh.emit(&RefreshRequest::TitlesChanged);
        }
        let structure = self.structure.poll(now);
        titles || structure
    }
}
