//! Read side of an archived build

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use super::{StoreError, StoreResult};
use crate::build::BuildNumber;

/// Maximum number of symlink hops followed when reading through a link.
const MAX_LINK_HOPS: usize = 8;

/// One record in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEntry {
    /// Regular file; content addressed by SHA-256
    File { size: u64, sha256: String },
    /// Symlink; only the raw target string is kept
    Symlink { target: String },
}

/// Where file content lives.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Blobs held in memory, keyed by SHA-256
    Memory(Arc<HashMap<String, Arc<[u8]>>>),
    /// Blob directory on disk; each blob is named by its SHA-256
    Disk(PathBuf),
}

/// Immutable artifact tree of one build.
#[derive(Debug, Clone)]
pub struct VirtualFileStore {
    build: BuildNumber,
    entries: BTreeMap<String, StoreEntry>,
    content: ContentSource,
}

impl VirtualFileStore {
    pub fn new(
        build: BuildNumber,
        entries: BTreeMap<String, StoreEntry>,
        content: ContentSource,
    ) -> Self {
        Self {
            build,
            entries,
            content,
        }
    }

    pub fn build(&self) -> BuildNumber {
        self.build
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All record paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All records, sorted by path.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &StoreEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    pub fn entry(&self, path: &str) -> Option<&StoreEntry> {
        self.entries.get(path)
    }

    /// Bytes of distinct file content. Records sharing a hash share a blob.
    pub fn total_size(&self) -> u64 {
        let blobs: HashMap<&str, u64> = self
            .entries
            .values()
            .filter_map(|e| match e {
                StoreEntry::File { size, sha256 } => Some((sha256.as_str(), *size)),
                StoreEntry::Symlink { .. } => None,
            })
            .collect();
        blobs.values().sum()
    }

    /// Directories implied by record paths.
    pub fn directories(&self) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for path in self.entries.keys() {
            let mut end = 0;
            while let Some(pos) = path[end..].find('/') {
                end += pos;
                dirs.insert(path[..end].to_string());
                end += 1;
            }
        }
        dirs
    }

    /// True if `path` is a directory implied by some record.
    pub fn is_dir(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return !self.entries.is_empty();
        }
        let prefix = format!("{}/", path);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }

    /// True if `path` is a record or an implied directory.
    ///
    /// A symlink record exists even when its target was not archived.
    pub fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path) || self.is_dir(path)
    }

    /// Names of the immediate children of directory `dir` (`""` for the root).
    pub fn list(&self, dir: &str) -> Vec<String> {
        let dir = dir.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let mut children = BTreeSet::new();
        for path in self.entries.keys() {
            if let Some(rest) = path.strip_prefix(&prefix) {
                let name = rest.split('/').next().unwrap_or(rest);
                children.insert(name.to_string());
            }
        }
        children.into_iter().collect()
    }

    /// Read file content. Symlinks are resolved inside this store only.
    pub fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let mut current = path.to_string();
        for _ in 0..=MAX_LINK_HOPS {
            match self.entries.get(&current) {
                Some(StoreEntry::File { sha256, .. }) => return self.read_blob(sha256, path),
                Some(StoreEntry::Symlink { target }) => {
                    current = resolve_link(&current, target)
                        .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                }
                None => return Err(StoreError::NotFound(path.to_string())),
            }
        }
        Err(StoreError::NotFound(path.to_string()))
    }

    fn read_blob(&self, sha256: &str, path: &str) -> StoreResult<Vec<u8>> {
        match &self.content {
            ContentSource::Memory(blobs) => blobs
                .get(sha256)
                .map(|b| b.to_vec())
                .ok_or_else(|| StoreError::NotFound(path.to_string())),
            ContentSource::Disk(dir) => match fs::read(dir.join(sha256)) {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StoreError::NotFound(path.to_string()))
                }
                Err(e) => Err(e.into()),
            },
        }
    }
}

/// Resolve a relative link target against the link's directory.
/// Absolute targets and targets escaping the store root resolve to nothing.
fn resolve_link(link_path: &str, target: &str) -> Option<String> {
    if target.starts_with('/') {
        return None;
    }
    let mut segments: Vec<&str> = link_path.split('/').collect();
    segments.pop();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
