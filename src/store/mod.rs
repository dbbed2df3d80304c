//! Per-build artifact storage
//!
//! Each archived build owns one write-once [`VirtualFileStore`]: a tree of file
//! records and symlink records keyed by relative path. Directories are never
//! stored; they are implied by record paths, so an empty directory cannot
//! exist in a store.
//!
//! An [`ArtifactStore`] holds the stores of every build of one project. Writing
//! goes through a [`StoreWriter`] that becomes visible only on commit; deleting
//! a store is all-or-nothing from the reader's point of view.

mod disk;
mod manifest;
mod memory;
mod vfs;

pub use disk::DiskArtifactStore;
pub use manifest::{ManifestEntry, ManifestEntryType, StoreManifest, SCHEMA_ID, SCHEMA_VERSION};
pub use memory::MemoryArtifactStore;
pub use vfs::{ContentSource, StoreEntry, VirtualFileStore};

use std::io::{self, Read};

use crate::build::BuildNumber;

/// Errors from artifact store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("build #{0} already has archived artifacts")]
    AlreadyArchived(BuildNumber),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact path '{0}'")]
    InvalidPath(String),

    #[error("corrupt manifest for build #{build}: {reason}")]
    CorruptManifest { build: BuildNumber, reason: String },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of deleting one build's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The store was removed
    Deleted { bytes: u64 },
    /// Nothing to remove; a concurrent pass got there first or nothing was archived
    AlreadyAbsent,
}

/// Storage for the artifact trees of one project's builds.
pub trait ArtifactStore: Send + Sync {
    /// Start writing the store for `build`.
    ///
    /// Fails with [`StoreError::AlreadyArchived`] if the build already has a
    /// store or another writer is open for it.
    fn begin(&self, build: BuildNumber) -> StoreResult<Box<dyn StoreWriter + '_>>;

    /// Open the committed store for `build`, if any.
    fn open(&self, build: BuildNumber) -> StoreResult<Option<VirtualFileStore>>;

    /// Builds that currently hold a committed store, ascending.
    fn archived_builds(&self) -> StoreResult<Vec<BuildNumber>>;

    /// Remove the store for `build`. An absent store is not an error.
    fn delete(&self, build: BuildNumber) -> StoreResult<DeleteOutcome>;

    /// Remove leftovers of deletions that were interrupted after the store was
    /// hidden. Returns how many were removed.
    fn purge_leftovers(&self) -> StoreResult<usize> {
        Ok(0)
    }

    /// True if `build` holds a committed store with at least one record.
    fn has_artifacts(&self, build: BuildNumber) -> bool {
        matches!(self.open(build), Ok(Some(store)) if !store.is_empty())
    }
}

/// Staged writer for one build's store. Dropping without commit discards it.
pub trait StoreWriter {
    /// Copy a regular file byte-for-byte. Returns the number of bytes written.
    fn add_file(&mut self, path: &str, reader: &mut dyn Read) -> StoreResult<u64>;

    /// Record a symlink by its raw target. The target is never read.
    fn add_symlink(&mut self, path: &str, target: &str) -> StoreResult<()>;

    /// Publish the store.
    fn commit(self: Box<Self>) -> StoreResult<VirtualFileStore>;
}

/// Validate a record path: relative, `/`-separated, no empty, `.` or `..` segments.
pub(crate) fn validate_path(path: &str) -> StoreResult<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("f").is_ok());
        assert!(validate_path("dir/sub/file").is_ok());
        assert!(validate_path(".hidden").is_ok());

        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a/", "a\\b"] {
            assert!(
                matches!(validate_path(bad), Err(StoreError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }
}
