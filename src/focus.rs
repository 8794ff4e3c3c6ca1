//! The list of pinned focus roots.

use crate::fs::write_atomic;
use crate::lock::StateLock;
use crate::types::FocusData;
use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the focus list inside the state directory
pub const FOCUS_FILE: &str = "focus.json";

#[derive(Debug, Error)]
pub enum FocusStoreError {
    #[error("focus list IO error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize focus list: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to lock state directory: {0}")]
    Lock(String),
}

impl FocusData {
    /// Pin `id` at the front. An id that is already present keeps its place.
    pub fn add(&mut self, id: &str) -> bool {
        if self.focus_list.iter().any(|f| f == id) {
            return false;
        }
        self.focus_list.insert(0, id.to_string());
        true
    }

    /// Unpin the first occurrence of `id`
    pub fn remove(&mut self, id: &str) -> bool {
        match self.focus_list.iter().position(|f| f == id) {
            Some(pos) => {
                self.focus_list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move an existing entry to the front; unknown ids are ignored
    pub fn move_to_front(&mut self, id: &str) -> bool {
        match self.focus_list.iter().position(|f| f == id) {
            Some(0) | None => false,
            Some(pos) => {
                let entry = self.focus_list.remove(pos);
                self.focus_list.insert(0, entry);
                true
            }
        }
    }

    /// Ids with duplicates collapsed, in first-occurrence order
    pub fn unique_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.focus_list
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.focus_list.iter().any(|f| f == id)
    }
}

/// JSON-backed store for [`FocusData`]
#[derive(Debug, Clone)]
pub struct FocusStore {
    path: PathBuf,
}

impl FocusStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(FOCUS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the focus list; missing or malformed content yields an empty list
    pub fn read(&self) -> FocusData {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return FocusData::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read focus list");
                return FocusData::default();
            }
        };
        if content.trim().is_empty() {
            return FocusData::default();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "malformed focus list, resetting");
            FocusData::default()
        })
    }

    pub fn write(&self, data: &FocusData) -> Result<(), FocusStoreError> {
        let payload = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.path, &payload)?;
        Ok(())
    }

    /// Read, apply `edit`, and write back if it reported a change, all under
    /// the state lock. Returns whether the list changed.
    pub fn update<F>(&self, edit: F) -> Result<bool, FocusStoreError>
    where
        F: FnOnce(&mut FocusData) -> bool,
    {
        let state_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let _lock =
            StateLock::acquire(state_dir).map_err(|e| FocusStoreError::Lock(format!("{:#}", e)))?;

        let mut data = self.read();
        if !edit(&mut data) {
            return Ok(false);
        }
        self.write(&data)?;
        tracing::info!(path = %self.path.display(), entries = data.focus_list.len(), "saved focus list");
        Ok(true)
    }
}
