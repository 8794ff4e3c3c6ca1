//! Workspace discovery and `.issuetree/config.yaml`.

use crate::focus::FocusStore;
use crate::lock::LOCK_FILE;
use crate::tree_store::TreeStore;
use crate::types::{FocusData, TreeData};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the state directory holding the tree, focus list and config
pub const STATE_DIR_NAME: &str = ".issuetree";
pub const CONFIG_FILE: &str = "config.yaml";
/// Environment variable overriding state directory discovery
pub const STATE_DIR_ENV: &str = "ISSUETREE_DIR";

/// Yields the directory documents live in, or `None` when unconfigured
pub trait DocumentRootResolver {
    fn resolve_document_root(&self) -> Option<PathBuf>;
}

/// A resolver that always answers the same thing
#[derive(Debug, Clone, Default)]
pub struct FixedRoot(pub Option<PathBuf>);

impl DocumentRootResolver for FixedRoot {
    fn resolve_document_root(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Document root; relative paths are resolved against the state directory
    pub document_root: PathBuf,
    pub title_debounce_ms: u64,
    pub structure_debounce_ms: u64,
    pub recent_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from(".."),
            title_debounce_ms: 200,
            structure_debounce_ms: 300,
            recent_limit: 50,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file means all defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn title_debounce(&self) -> Duration {
        Duration::from_millis(self.title_debounce_ms)
    }

    pub fn structure_debounce(&self) -> Duration {
        Duration::from_millis(self.structure_debounce_ms)
    }
}

/// An initialized `.issuetree` directory and its configuration
#[derive(Debug, Clone)]
pub struct Workspace {
    state_dir: PathBuf,
    config: Config,
}

impl Workspace {
    /// Open an existing state directory
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        if !state_dir.is_dir() {
            anyhow::bail!(
                "{} is not an issuetree state directory. Run 'itree init' first.",
                state_dir.display()
            );
        }
        let config = Config::load(&state_dir.join(CONFIG_FILE))?;
        Ok(Self { state_dir, config })
    }

    /// Create `<dir>/.issuetree` with a default config, an empty tree and an
    /// empty focus list. Existing files are left alone.
    pub fn init(dir: &Path) -> Result<Self> {
        let state_dir = dir.join(STATE_DIR_NAME);
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create {}", state_dir.display()))?;

        let config_path = state_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            let yaml = serde_yaml::to_string(&Config::default())?;
            fs::write(&config_path, yaml).context("Failed to write config.yaml")?;
        }

        let workspace = Self::open(&state_dir)?;
        let tree_store = workspace.tree_store();
        if !tree_store.path().exists() {
            tree_store
                .save(&mut TreeData::default())
                .context("Failed to write empty tree")?;
        }
        let focus_store = workspace.focus_store();
        if !focus_store.path().exists() {
            focus_store
                .write(&FocusData::default())
                .context("Failed to write empty focus list")?;
        }
        ensure_gitignore(&state_dir)?;
        Ok(workspace)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree_store(&self) -> TreeStore {
        TreeStore::in_dir(&self.state_dir)
    }

    pub fn focus_store(&self) -> FocusStore {
        FocusStore::in_dir(&self.state_dir)
    }
}

impl DocumentRootResolver for Workspace {
    fn resolve_document_root(&self) -> Option<PathBuf> {
        let configured = &self.config.document_root;
        let candidate = if configured.is_absolute() {
            configured.clone()
        } else {
            self.state_dir.join(configured)
        };
        match candidate.canonicalize() {
            Ok(root) if root.is_dir() => Some(root),
            _ => {
                tracing::warn!(root = %candidate.display(), "document root does not exist");
                None
            }
        }
    }
}

/// Find the state directory: an explicit path, then `$ISSUETREE_DIR`, then
/// the nearest `.issuetree` above the current directory
pub fn locate_state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = env::var(STATE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    find_state_dir(&env::current_dir()?)
}

/// Walk up from `start` looking for a `.issuetree` directory
pub fn find_state_dir(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(STATE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            anyhow::bail!(
                "No {} directory found. Run 'itree init' to create one.",
                STATE_DIR_NAME
            );
        }
    }
}

fn ensure_gitignore(state_dir: &Path) -> Result<()> {
    use std::io::Write;

    let gitignore_path = state_dir.join(".gitignore");
    let existing = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path).context("Failed to read .gitignore")?
    } else {
        String::new()
    };
    if existing.lines().any(|line| line.trim() == LOCK_FILE) {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore_path)
        .context("Failed to open .gitignore for writing")?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", LOCK_FILE)?;
    Ok(())
}
