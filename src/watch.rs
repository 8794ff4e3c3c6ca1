//! Filesystem watching and the single-threaded event loop.

use crate::engine::Engine;
use crate::format::is_document_path;
use crate::fs::relative_to_root;
use crate::types::{DocumentEvent, DocumentEventKind};
use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Reports document changes under a root as [`DocumentEvent`]s.
///
/// Events are sent from notify's own thread; dropping the watcher stops them.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl DocumentWatcher {
    /// Watch `root` recursively, returning the watcher and its event stream
    pub fn start(root: &Path) -> Result<(Self, UnboundedReceiver<DocumentEvent>)> {
        let (tx, rx) = unbounded_channel();
        let watcher = Self::start_with_sender(root, tx)?;
        Ok((watcher, rx))
    }

    pub fn start_with_sender(root: &Path, tx: UnboundedSender<DocumentEvent>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        let event_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for doc_event in translate_event(&event_root, &event) {
                    if tx.send(doc_event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        tracing::info!(root = %root.display(), "watching documents");

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map a raw notify event onto document events, dropping non-documents and
/// anything inside hidden directories
pub fn translate_event(root: &Path, event: &notify::Event) -> Vec<DocumentEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => DocumentEventKind::Created,
        EventKind::Remove(_) => DocumentEventKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => DocumentEventKind::Deleted,
        EventKind::Modify(_) => DocumentEventKind::Changed,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| is_document_path(path))
        .filter_map(|path| relative_to_root(root, path))
        .filter(|rel| !rel.split('/').any(|part| part.starts_with('.')))
        .map(|rel| DocumentEvent::new(rel, kind))
        .collect()
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Drive `engine` from `events` until the stream closes or `shutdown`
/// completes. Events are handled one at a time; debounced work runs when its
/// deadline passes, and a new event pushes the deadline out instead of
/// queueing more work.
pub async fn run_event_loop<F>(
    engine: &mut Engine,
    events: &mut UnboundedReceiver<DocumentEvent>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    tracing::debug!(path = %event.path, kind = %event.kind, "document event");
                    engine.on_document_event(&event, Instant::now());
                }
                None => break,
            },
            _ = sleep_until_deadline(deadline) => {
                engine.poll(Instant::now());
            }
            _ = &mut shutdown => break,
        }
    }
}
