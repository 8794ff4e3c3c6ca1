//! issuetree library
//!
//! A curated tree of markdown documents with several read views, cycle-safe
//! drag-and-drop reorganization, and a frontmatter-declared structure view
//! kept current against a live filesystem.

pub mod config;
pub mod debounce;
pub mod engine;
pub mod focus;
pub mod format;
pub mod frontmatter;
pub mod fs;
pub mod ids;
pub mod lock;
pub mod reorganize;
pub mod structure;
pub mod subject;
pub mod title_cache;
pub mod tree_store;
pub mod types;
pub mod views;
pub mod watch;

pub use engine::Engine;
