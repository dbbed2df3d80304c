//! Candidate enumeration for archiving
//!
//! A workspace is a flat list of relative paths, each tagged as a regular
//! file, a directory or a symlink, plus a way to read file content while the
//! archive call runs. Symlinks are reported as themselves and never followed.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a workspace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Symlink with its raw, unresolved target
    Symlink { target: String },
}

/// One candidate path under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEntry {
    /// Relative path using `/` separators
    pub path: String,
    pub kind: EntryKind,
}

impl WorkspaceEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// Source of candidate files for one archiving call.
pub trait Workspace {
    /// Enumerate all entries, sorted by path.
    fn entries(&self) -> io::Result<Vec<WorkspaceEntry>>;

    /// Open a regular file for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>>;
}

/// Workspace backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirWorkspace {
    root: PathBuf,
}

impl DirWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Workspace for DirWorkspace {
    fn entries(&self) -> io::Result<Vec<WorkspaceEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            let path = entry.path();

            let rel_path = path
                .strip_prefix(&self.root)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, path.display().to_string()))?;

            // Skip root itself
            if rel_path.as_os_str().is_empty() {
                continue;
            }

            let rel = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink {
                    target: fs::read_link(path)?.to_string_lossy().into_owned(),
                }
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                // Sockets, fifos and devices are never archived
                continue;
            };

            entries.push(WorkspaceEntry { path: rel, kind });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.root.join(path))?))
    }
}

#[derive(Debug, Clone)]
enum MemoryNode {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

/// In-memory workspace, for embedding and tests.
///
/// Adding a file or symlink also adds its parent directories.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspace {
    nodes: BTreeMap<String, MemoryNode>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.add_parents(path);
        self.nodes.insert(path.to_string(), MemoryNode::File(content.into()));
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.add_parents(path);
        self.nodes.insert(path.to_string(), MemoryNode::Directory);
        self
    }

    pub fn with_symlink(mut self, path: &str, target: &str) -> Self {
        self.add_parents(path);
        self.nodes
            .insert(path.to_string(), MemoryNode::Symlink(target.to_string()));
        self
    }

    fn add_parents(&mut self, path: &str) {
        let mut prefix = String::new();
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            self.nodes
                .entry(prefix.clone())
                .or_insert(MemoryNode::Directory);
        }
    }
}

impl Workspace for MemoryWorkspace {
    fn entries(&self) -> io::Result<Vec<WorkspaceEntry>> {
        Ok(self
            .nodes
            .iter()
            .map(|(path, node)| WorkspaceEntry {
                path: path.clone(),
                kind: match node {
                    MemoryNode::File(_) => EntryKind::File,
                    MemoryNode::Directory => EntryKind::Directory,
                    MemoryNode::Symlink(target) => EntryKind::Symlink {
                        target: target.clone(),
                    },
                },
            })
            .collect())
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        match self.nodes.get(path) {
            Some(MemoryNode::File(content)) => Ok(Box::new(Cursor::new(content.as_slice()))),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path),
            )),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }
}
