//! Reading and updating the link fields of document frontmatter.

use crate::format::{parse_document, render_document, Frontmatter};
use crate::fs::write_atomic;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Access to the frontmatter links of documents under the document root.
///
/// All paths are relative to the document root. Writers keep `parent_file`
/// and the parent's `children_files` symmetric; readers rely on that.
pub trait FrontmatterStore {
    /// Frontmatter of `path`, or `None` when the document has no block
    fn read_frontmatter(&self, path: &str) -> Result<Option<Frontmatter>>;

    /// Append `child` to `parent`'s `children_files`. Returns whether the
    /// document was rewritten.
    fn add_child_to_parent(&self, child: &str, parent: &str) -> Result<bool>;

    /// Point `child`'s `parent_file` at `parent`, inheriting the parent's
    /// `root_file` when the child has none. Returns whether it was rewritten.
    fn set_parent_file(&self, child: &str, parent: &str) -> Result<bool>;
}

/// [`FrontmatterStore`] over markdown files on disk
#[derive(Debug, Clone)]
pub struct MarkdownFrontmatter {
    root: PathBuf,
}

impl MarkdownFrontmatter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn load(&self, path: &str) -> Result<(Frontmatter, String)> {
        let full = self.root.join(path);
        let content = fs::read_to_string(&full)
            .with_context(|| format!("Failed to read {}", full.display()))?;
        let doc = parse_document(&content)
            .with_context(|| format!("Failed to parse {}", full.display()))?;
        Ok((doc.frontmatter.unwrap_or_default(), doc.body))
    }

    fn store(&self, path: &str, frontmatter: &Frontmatter, body: &str) -> Result<()> {
        let full = self.root.join(path);
        let rendered = render_document(frontmatter, body)?;
        write_atomic(&full, rendered.as_bytes())
            .with_context(|| format!("Failed to write {}", full.display()))
    }
}

impl FrontmatterStore for MarkdownFrontmatter {
    fn read_frontmatter(&self, path: &str) -> Result<Option<Frontmatter>> {
        let full = self.root.join(path);
        let content = fs::read_to_string(&full)
            .with_context(|| format!("Failed to read {}", full.display()))?;
        let doc = parse_document(&content)
            .with_context(|| format!("Failed to parse {}", full.display()))?;
        Ok(doc.frontmatter)
    }

    fn add_child_to_parent(&self, child: &str, parent: &str) -> Result<bool> {
        if child == parent {
            anyhow::bail!("Document {} cannot be its own child", child);
        }
        let (mut frontmatter, body) = self.load(parent)?;
        if frontmatter.children_files.iter().any(|c| c == child) {
            return Ok(false);
        }
        frontmatter.children_files.push(child.to_string());
        self.store(parent, &frontmatter, &body)?;
        tracing::info!(parent, child, "linked child document");
        Ok(true)
    }

    fn set_parent_file(&self, child: &str, parent: &str) -> Result<bool> {
        if child == parent {
            anyhow::bail!("Document {} cannot be its own parent", child);
        }
        let (mut frontmatter, body) = self.load(child)?;

        let mut changed = false;
        if frontmatter.parent_file.as_deref() != Some(parent) {
            frontmatter.parent_file = Some(parent.to_string());
            changed = true;
        }
        if frontmatter.root_file.is_none() {
            let parent_root = self
                .read_frontmatter(parent)?
                .and_then(|fm| fm.root_file)
                .unwrap_or_else(|| parent.to_string());
            frontmatter.root_file = Some(parent_root);
            changed = true;
        }

        if changed {
            self.store(child, &frontmatter, &body)?;
            tracing::info!(parent, child, "set parent document");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_link_child_both_directions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("root.md"), "---\nroot_file: root.md\nstatus: open\n---\n# Root\n").unwrap();
        fs::write(dir.path().join("new.md"), "# New\n").unwrap();
        let store = MarkdownFrontmatter::new(dir.path());

        assert!(store.set_parent_file("new.md", "root.md").unwrap());
        assert!(store.add_child_to_parent("new.md", "root.md").unwrap());
        assert!(!store.add_child_to_parent("new.md", "root.md").unwrap());
        assert!(!store.set_parent_file("new.md", "root.md").unwrap());

        let child = store.read_frontmatter("new.md").unwrap().unwrap();
        assert_eq!(child.parent_file.as_deref(), Some("root.md"));
        assert_eq!(child.root_file.as_deref(), Some("root.md"));

        let parent = store.read_frontmatter("root.md").unwrap().unwrap();
        assert_eq!(parent.children_files, vec!["new.md"]);
        assert_eq!(parent.extra.get("status").and_then(|v| v.as_str()), Some("open"));

        let body = fs::read_to_string(dir.path().join("new.md")).unwrap();
        assert!(body.ends_with("# New\n"));
    }

    #[test]
    fn test_child_inherits_parents_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("mid.md"), "---\nroot_file: top.md\n---\n").unwrap();
        fs::write(dir.path().join("leaf.md"), "leaf\n").unwrap();
        let store = MarkdownFrontmatter::new(dir.path());

        store.set_parent_file("leaf.md", "mid.md").unwrap();
        let leaf = store.read_frontmatter("leaf.md").unwrap().unwrap();
        assert_eq!(leaf.root_file.as_deref(), Some("top.md"));
    }

    #[test]
    fn test_missing_documents_are_errors() {
        let dir = tempdir().unwrap();
        let store = MarkdownFrontmatter::new(dir.path());
        assert!(store.read_frontmatter("nope.md").is_err());
        assert!(store.add_child_to_parent("a.md", "nope.md").is_err());
        assert!(store.add_child_to_parent("a.md", "a.md").is_err());
    }
}
