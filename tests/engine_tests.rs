//! End-to-end behaviour of the engine over a real workspace directory.

use issuetree::config::{Workspace, CONFIG_FILE};
use issuetree::reorganize::{Disassociation, DropError, DropPayload};
use issuetree::structure::StructureState;
use issuetree::tree_store::TreeStore;
use issuetree::types::{DocumentEvent, DocumentEventKind, Node, RefreshRequest, TreeData, ViewKind, ViewNodeId};
use issuetree::watch::run_event_loop;
use issuetree::Engine;
use similar_asserts::assert_eq;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct TestWorkspace {
    dir: TempDir,
    workspace: Workspace,
}

impl TestWorkspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        Self { dir, workspace }
    }

    /// Workspace whose config sets both debounce windows to `ms`
    fn with_debounce(ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join(".issuetree");
        fs::create_dir_all(&state).unwrap();
        fs::write(
            state.join(CONFIG_FILE),
            format!("title-debounce-ms: {ms}\nstructure-debounce-ms: {ms}\n"),
        )
        .unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        Self { dir, workspace }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn seed_tree(&self, roots: Vec<Node>) {
        let store = self.workspace.tree_store();
        let mut tree = store.load();
        tree.root_nodes = roots;
        store.save(&mut tree).unwrap();
    }

    fn engine(&self) -> Engine {
        Engine::open(&self.workspace)
    }
}

fn record_refreshes(engine: &mut Engine) -> Rc<RefCell<Vec<RefreshRequest>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    engine.subscribe(move |request| sink.borrow_mut().push(request.clone()));
    seen
}

fn sample(ws: &TestWorkspace) {
    ws.write("epic.md", "---\nissue_title: Search epic\n---\nbody\n");
    ws.write("tasks/index.md", "# Index the corpus\n");
    ws.write("tasks/rank.md", "no heading here\n");
    ws.write("loose.md", "# Loose note\n");
    let mut epic = Node::new("epic", "epic.md").with_children(vec![
        Node::new("index", "tasks/index.md"),
        Node::new("rank", "tasks/rank.md"),
    ]);
    epic.expanded = true;
    ws.seed_tree(vec![epic]);
}

#[test]
fn test_overview_rows_use_resolved_titles() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();

    let rows = engine.overview_items();
    let titles: Vec<(&str, usize)> = rows.iter().map(|r| (r.title.as_str(), r.depth)).collect();
    assert_eq!(titles, vec![("Search epic", 0), ("Index the corpus", 1), ("rank", 1)]);
    assert!(rows[0].has_children);
    assert!(!rows[1].has_children);
}

#[test]
fn test_one_refresh_per_accepted_move() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();
    let seen = record_refreshes(&mut engine);

    let report = engine
        .move_nodes(&[ViewNodeId::canonical("rank")], Some(&ViewNodeId::canonical("index")))
        .unwrap();
    assert_eq!(report.moved, vec!["rank".to_string()]);
    assert_eq!(*seen.borrow(), vec![RefreshRequest::TreeChanged]);

    // Into its own descendant: refused, no save, no refresh
    let revision = engine.tree().revision;
    let report = engine
        .move_nodes(&[ViewNodeId::canonical("epic")], Some(&ViewNodeId::canonical("rank")))
        .unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(engine.tree().revision, revision);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn test_move_onto_missing_target_fails() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();
    let err = engine
        .move_nodes(&[ViewNodeId::canonical("rank")], Some(&ViewNodeId::canonical("ghost")))
        .unwrap_err();
    assert!(matches!(err, DropError::TargetMissing(ref id) if id == "ghost"));
}

#[test]
fn test_external_drop_tracks_untracked_document() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();
    assert_eq!(engine.untracked(), vec!["loose.md".to_string()]);

    let loose = ws.root().join("loose.md");
    let report = engine
        .handle_drop(
            ViewKind::Overview,
            Some(&ViewNodeId::canonical("epic")),
            &DropPayload::External(vec![loose.clone(), ws.root().join("notes.txt")]),
        )
        .unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].file_path, "loose.md");
    assert_eq!(report.rejected.len(), 1);
    assert!(engine.untracked().is_empty());

    let tree = engine.tree();
    let epic = tree.find_node("epic").unwrap();
    assert_eq!(epic.children[0].file_path, "loose.md");

    // Dropping the same file again moves the existing node instead of duplicating it
    let report = engine
        .handle_drop(ViewKind::Recent, None, &DropPayload::Recent(vec![loose]))
        .unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.moved.len(), 1);
    let tree = engine.tree();
    assert_eq!(tree.node_count(), 4);
    assert_eq!(tree.root_nodes[0].file_path, "loose.md");
}

#[test]
fn test_focused_view_copies_and_disassociate() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();
    let seen = record_refreshes(&mut engine);

    // Newest pin goes on top; re-adding an existing pin is a no-op
    assert!(engine.add_focus(&ViewNodeId::canonical("epic")).unwrap());
    assert!(engine.add_focus(&ViewNodeId::canonical("index")).unwrap());
    assert!(!engine.add_focus(&ViewNodeId::canonical("epic")).unwrap());

    let rows = engine.focused_items();
    assert_eq!(rows[0].key, ViewNodeId::focus_root("index").to_key());
    assert_eq!(rows[0].description.as_deref(), Some("Search epic"));
    assert!(rows.iter().filter(|r| r.is_focus_root).count() == 2);
    // `index` shows up once as a root and once inside the epic's copy
    assert_eq!(rows.iter().filter(|r| r.title == "Index the corpus").count(), 2);

    // Dropping onto the focused view's root is refused outright
    let err = engine
        .handle_drop(
            ViewKind::Focused,
            None,
            &DropPayload::Focused(vec![ViewNodeId::focused("rank", "epic")]),
        )
        .unwrap_err();
    assert!(matches!(err, DropError::FocusedRootDrop));

    let epic = ViewNodeId::focus_root("epic");
    assert_eq!(
        engine.disassociate(&epic, false).unwrap(),
        Disassociation::NeedsConfirmation { descendants: 2 }
    );
    assert_eq!(engine.tree().node_count(), 3);
    assert_eq!(
        engine.disassociate(&epic, true).unwrap(),
        Disassociation::Removed { removed: 3 }
    );
    assert_eq!(engine.tree().node_count(), 0);
    assert!(engine.focused_items().is_empty());
    assert!(seen.borrow().iter().all(|r| *r == RefreshRequest::TreeChanged));
    assert_eq!(seen.borrow().len(), 3);
}

#[test]
fn test_refresh_all_emits_all() {
    let ws = TestWorkspace::new();
    let mut engine = ws.engine();
    let seen = record_refreshes(&mut engine);
    engine.refresh_all();
    assert_eq!(*seen.borrow(), vec![RefreshRequest::All]);
}

#[test]
fn test_empty_state_files_give_empty_views() {
    let ws = TestWorkspace::new();
    fs::write(ws.workspace.tree_store().path(), "").unwrap();
    fs::write(ws.workspace.focus_store().path(), "").unwrap();
    let mut engine = ws.engine();

    assert_eq!(engine.tree(), TreeData::default());
    assert!(engine.overview_items().is_empty());
    assert!(engine.focused_items().is_empty());
}

#[test]
fn test_concurrent_writer_is_detected() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let store = TreeStore::in_dir(ws.workspace.state_dir());
    let mut stale = store.load();

    let mut engine = ws.engine();
    engine
        .toggle_expanded(&ViewNodeId::canonical("epic"), Some(false))
        .unwrap();

    stale.root_nodes.clear();
    assert!(store.save(&mut stale).is_err());
    assert_eq!(engine.tree().node_count(), 3);
}

#[tokio::test]
async fn test_event_burst_rebuilds_structure_once() {
    let ws = TestWorkspace::with_debounce(20);
    ws.write(
        "epic.md",
        "---\nroot_file: epic.md\nchildren_files: [task.md]\n---\n# Epic\n",
    );
    ws.write("task.md", "---\nroot_file: epic.md\nparent_file: epic.md\n---\n# Task\n");
    let mut engine = ws.engine();

    assert!(matches!(engine.activate("task.md"), StructureState::Tree(_)));
    let rebuilds = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&rebuilds);
    engine
        .structure_mut()
        .subscribe(move |_| *counter.borrow_mut() += 1);

    ws.write("task.md", "---\nroot_file: epic.md\nparent_file: epic.md\n---\n# Task renamed\n");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for _ in 0..5 {
        tx.send(DocumentEvent::new("task.md", DocumentEventKind::Changed)).unwrap();
    }

    run_event_loop(&mut engine, &mut rx, tokio::time::sleep(Duration::from_millis(300))).await;
    drop(tx);

    assert_eq!(*rebuilds.borrow(), 1);
    match engine.structure().state() {
        StructureState::Tree(tree) => {
            assert_eq!(tree.title, "Epic");
            assert_eq!(tree.children[0].title, "Task renamed");
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[test]
fn test_body_edit_keeps_titles_quiet() {
    let ws = TestWorkspace::new();
    let path = ws.write("a.md", "# Alpha\n");
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();
    ws.seed_tree(vec![Node::new("a", "a.md")]);
    let mut engine = ws.engine();

    assert_eq!(engine.title("a.md"), "Alpha");
    engine.poll(Instant::now() + Duration::from_secs(5));
    let seen = record_refreshes(&mut engine);

    ws.write("a.md", "# Alpha\n\nA longer body.\n");
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(2_000, 0)).unwrap();
    engine.on_document_event(&DocumentEvent::new("a.md", DocumentEventKind::Changed), Instant::now());
    assert_eq!(engine.title("a.md"), "Alpha");
    engine.poll(Instant::now() + Duration::from_secs(5));
    assert!(seen.borrow().is_empty());

    ws.write("a.md", "# Alpha v2\n");
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(3_000, 0)).unwrap();
    engine.on_document_event(&DocumentEvent::new("a.md", DocumentEventKind::Changed), Instant::now());
    assert_eq!(engine.title("a.md"), "Alpha v2");
    engine.poll(Instant::now() + Duration::from_secs(5));
    assert_eq!(*seen.borrow(), vec![RefreshRequest::TitlesChanged]);
}

#[test]
fn test_overview_move_rejects_focus_root_keys() {
    let ws = TestWorkspace::new();
    sample(&ws);
    let mut engine = ws.engine();
    let seen = record_refreshes(&mut engine);

    let report = engine
        .move_nodes(
            &[ViewNodeId::focus_root("rank"), ViewNodeId::canonical("index")],
            None,
        )
        .unwrap();
    assert_eq!(report.moved, vec!["index".to_string()]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].item, ViewNodeId::focus_root("rank").to_key());

    let tree = engine.tree();
    assert_eq!(tree.root_nodes[0].id, "index");
    assert_eq!(tree.ancestors("rank")[0].id, "epic");
    assert_eq!(*seen.borrow(), vec![RefreshRequest::TreeChanged]);

    // Only focus roots: nothing saved, nothing emitted
    let report = engine
        .move_nodes(&[ViewNodeId::focus_root("epic")], Some(&ViewNodeId::canonical("index")))
        .unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(seen.borrow().len(), 1);
}
