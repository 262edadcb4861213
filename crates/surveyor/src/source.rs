//! Configuration-source abstraction.
//!
//! Blueprints live in an external version-controlled tree. The scheduler
//! needs exactly three capabilities from it: a recursive listing of the
//! tree, raw file contents, and the latest commit id of the default branch
//! (passed to the pipeline as provenance). The tree is read-only at
//! runtime and fetched fresh each tick; there is no caching between ticks.

use async_trait::async_trait;

use crate::error::Result;

/// One file in the configuration-source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the repository root.
    pub path: String,
    /// Object size in bytes, when the source reports one.
    pub size: Option<u64>,
}

/// Read-only view of the remote configuration repository.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// List the full recursive tree of the default branch.
    ///
    /// # Errors
    ///
    /// A listing failure aborts the scheduler tick: without the tree the
    /// scheduler cannot know what it missed.
    async fn list_tree(&self) -> Result<Vec<TreeEntry>>;

    /// Fetch raw file contents at a path on the default branch.
    async fn fetch_file(&self, path: &str) -> Result<String>;

    /// Latest commit id of the default branch.
    async fn latest_commit(&self) -> Result<String>;
}
