//! Filesystem access used by the caches.
//!
//! The title cache and the structure builder only ever stat and read
//! documents. Routing both through `DocumentFs` lets tests count how often
//! each happens.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path};
use std::time::SystemTime;

/// Read-only document access
pub trait DocumentFs: Send + Sync {
    /// Last modification time of the file
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;

    /// Full file contents as UTF-8
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// `DocumentFs` backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl DocumentFs for StdFs {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Path of `path` relative to `root` with `/` separators, or `None` when it
/// lies outside `root`
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Write `data` to `path` through a temporary sibling file and a rename, so
/// readers never observe a half-written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tree.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_relative_to_root() {
        let root = Path::new("/docs");
        assert_eq!(
            relative_to_root(root, Path::new("/docs/a/b.md")).as_deref(),
            Some("a/b.md")
        );
        assert_eq!(relative_to_root(root, Path::new("/other/b.md")), None);
        assert_eq!(relative_to_root(root, Path::new("/docs/../etc/x.md")), None);
        assert_eq!(relative_to_root(root, Path::new("/docs")), None);
    }

    #[test]
    fn test_std_fs_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = StdFs.modified(&dir.path().join("missing.md")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
