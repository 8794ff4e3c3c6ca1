//! Cache-aside document title resolution, validated by modification time.

use crate::debounce::Debouncer;
use crate::format::{file_stem_title, resolve_title};
use crate::fs::DocumentFs;
use crate::subject::{Subject, SubscriptionId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_TITLE_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleCacheEntry {
    pub title: String,
    pub mtime: SystemTime,
}

/// Resolves display titles for documents.
///
/// Keys are absolute paths or paths relative to the document root. A title
/// is recomputed only when the file's mtime differs from the cached one.
/// Every write that changes a title arms a debouncer; subscribers are told
/// once per burst, when the owner calls [`TitleCache::poll_notifications`].
pub struct TitleCache {
    fs: Arc<dyn DocumentFs>,
    root: Option<PathBuf>,
    entries: HashMap<PathBuf, TitleCacheEntry>,
    debouncer: Debouncer,
    updates: Subject<()>,
}

impl TitleCache {
    pub fn new(fs: Arc<dyn DocumentFs>, root: Option<PathBuf>, debounce: Duration) -> Self {
        Self {
            fs,
            root,
            entries: HashMap::new(),
            debouncer: Debouncer::new(debounce),
            updates: Subject::new(),
        }
    }

    /// Point the cache at a new document root, dropping every entry
    pub fn set_root(&mut self, root: Option<PathBuf>) {
        if self.root != root {
            self.entries.clear();
            self.root = root;
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let path = Path::new(key);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn get(&mut self, key: &str) -> String {
        let path = self.resolve(key);

        let mtime = match self.fs.modified(&path) {
            Ok(mtime) => mtime,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "stat failed, resolving title uncached");
                return self.compute(&path, key);
            }
        };

        if let Some(entry) = self.entries.get(&path) {
            if entry.mtime == mtime {
                return entry.title.clone();
            }
        }

        let content = match self.fs.read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "read failed, using file name");
                return file_stem_title(key);
            }
        };
        let title = resolve_title(&content, key);

        match self.entries.get_mut(&path) {
            Some(entry) if entry.title == title => entry.mtime = mtime,
            _ => {
                self.entries.insert(
                    path,
                    TitleCacheEntry {
                        title: title.clone(),
                        mtime,
                    },
                );
                self.debouncer.trigger(Instant::now());
            }
        }
        title
    }

    fn compute(&self, path: &Path, key: &str) -> String {
        match self.fs.read_to_string(path) {
            Ok(content) => resolve_title(&content, key),
            Err(_) => file_stem_title(key),
        }
    }

    pub fn entry(&self, key: &str) -> Option<&TitleCacheEntry> {
        self.entries.get(&self.resolve(key))
    }

    pub fn invalidate(&mut self, key: &str) {
        let path = self.resolve(key);
        self.entries.remove(&path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&()) + 'static) -> SubscriptionId {
        self.updates.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.updates.unsubscribe(id)
    }

    /// When the next notification is due, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Deliver the pending notification if its quiet period has elapsed
    pub fn poll_notifications(&mut self, now: Instant) -> bool {
        if self.debouncer.fire_if_due(now) {
            self.updates.emit(&());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::CountingFs;
    use std::cell::Cell;
    use std::rc::Rc;

    fn cache_with(fs: &Arc<CountingFs>) -> TitleCache {
        let fs: Arc<dyn DocumentFs> = fs.clone();
        TitleCache::new(fs, Some(PathBuf::from("/docs")), DEFAULT_TITLE_DEBOUNCE)
    }

    #[test]
    fn test_get_recomputes_once_per_mtime() {
        let fs = Arc::new(CountingFs::new());
        fs.put("/docs/a.md", "# Alpha\n", 100);
        let mut cache = cache_with(&fs);

        assert_eq!(cache.get("a.md"), "Alpha");
        assert_eq!(cache.get("a.md"), "Alpha");
        assert_eq!(cache.get("/docs/a.md"), "Alpha");
        assert_eq!(fs.reads(), 1);

        fs.put("/docs/a.md", "# Beta\n", 200);
        assert_eq!(cache.get("a.md"), "Beta");
        assert_eq!(cache.get("a.md"), "Beta");
        assert_eq!(fs.reads(), 2);
    }

    #[test]
    fn test_same_title_only_refreshes_mtime() {
        let fs = Arc::new(CountingFs::new());
        fs.put("/docs/a.md", "# Alpha\n", 100);
        let mut cache = cache_with(&fs);
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        cache.subscribe(move |_| counter.set(counter.get() + 1));

        cache.get("a.md");
        let later = Instant::now() + Duration::from_secs(1);
        assert!(cache.poll_notifications(later));

        fs.put("/docs/a.md", "# Alpha\n\nmore body\n", 150);
        cache.get("a.md");
        assert_eq!(
            cache.entry("a.md").unwrap().mtime,
            SystemTime::UNIX_EPOCH + Duration::from_secs(150)
        );
        assert!(cache.next_deadline().is_none());
        assert!(!cache.poll_notifications(later + Duration::from_secs(1)));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_burst_of_writes_notifies_once() {
        let fs = Arc::new(CountingFs::new());
        let mut cache = cache_with(&fs);
        for i in 0..10 {
            fs.put(format!("/docs/{}.md", i), &format!("# Doc {}\n", i), 1);
        }
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        cache.subscribe(move |_| counter.set(counter.get() + 1));

        for i in 0..10 {
            cache.get(&format!("{}.md", i));
        }
        let later = Instant::now() + Duration::from_secs(1);
        assert!(cache.poll_notifications(later));
        assert!(!cache.poll_notifications(later));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_stem() {
        let fs = Arc::new(CountingFs::new());
        let mut cache = cache_with(&fs);
        assert_eq!(cache.get("notes/gone.md"), "gone");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stat_failure_reads_title_uncached() {
        let fs = Arc::new(CountingFs::new());
        fs.put("/docs/a.md", "# Alpha\n", 100);
        fs.fail_stats(true);
        let mut cache = cache_with(&fs);

        assert_eq!(cache.get("a.md"), "Alpha");
        assert_eq!(cache.get("a.md"), "Alpha");
        assert!(cache.is_empty());
        assert_eq!(fs.reads(), 2);
        assert!(cache.next_deadline().is_none());
    }

    #[test]
    fn test_title_resolution_order() {
        let fs = Arc::new(CountingFs::new());
        fs.put("/docs/fm.md", "---\nissue_title: Pinned\n---\n# Heading\n", 1);
        fs.put("/docs/plain.md", "no heading here\n", 1);
        let mut cache = cache_with(&fs);
        assert_eq!(cache.get("fm.md"), "Pinned");
        assert_eq!(cache.get("plain.md"), "plain");
    }

    #[test]
    fn test_invalidate_and_clear() {
        let fs = Arc::new(CountingFs::new());
        fs.put("/docs/a.md", "# A\n", 1);
        fs.put("/docs/b.md", "# B\n", 1);
        let mut cache = cache_with(&fs);
        cache.get("a.md");
        cache.get("b.md");

        cache.invalidate("a.md");
        assert!(cache.entry("a.md").is_none());
        cache.get("a.md");
        assert_eq!(fs.reads(), 3);

        cache.clear();
        assert!(cache.is_empty());
    }
}
