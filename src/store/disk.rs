//! On-disk artifact store
//!
//! Layout under the project root:
//!
//! ```text
//! builds/<N>/archive/manifest.json                commit marker, written last
//! builds/<N>/archive/blobs/<sha256>               file content
//! builds/<N>/archive.partial/                     writer staging area
//! builds/<N>/archive.deleting-<pid>-<nanos>/      store being removed
//! ```
//!
//! A writer stages into `archive.partial` and publishes by renaming it to
//! `archive`. Deletion renames `archive` away before removing it, so a store is
//! either fully visible or not visible at all. A removal that fails halfway
//! leaves a `archive.deleting-*` tree behind; [`DiskArtifactStore::purge_leftovers`]
//! sweeps those.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{
    validate_path, ArtifactStore, ContentSource, DeleteOutcome, StoreEntry, StoreError,
    StoreManifest, StoreResult, StoreWriter, VirtualFileStore,
};
use crate::build::BuildNumber;

const ARCHIVE_DIR: &str = "archive";
const STAGING_DIR: &str = "archive.partial";
const DELETING_PREFIX: &str = "archive.deleting-";
const BLOBS_DIR: &str = "blobs";
const MANIFEST_FILE: &str = "manifest.json";

/// Artifact store rooted at a project directory.
#[derive(Debug, Clone)]
pub struct DiskArtifactStore {
    root: PathBuf,
}

impl DiskArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    fn build_dir(&self, build: BuildNumber) -> PathBuf {
        self.builds_dir().join(build.to_string())
    }

    fn archive_dir(&self, build: BuildNumber) -> PathBuf {
        self.build_dir(build).join(ARCHIVE_DIR)
    }
}

impl ArtifactStore for DiskArtifactStore {
    fn begin(&self, build: BuildNumber) -> StoreResult<Box<dyn StoreWriter + '_>> {
        let build_dir = self.build_dir(build);
        fs::create_dir_all(&build_dir)?;

        if build_dir.join(ARCHIVE_DIR).exists() {
            return Err(StoreError::AlreadyArchived(build));
        }

        let staging = build_dir.join(STAGING_DIR);
        match fs::create_dir(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyArchived(build));
            }
            Err(e) => return Err(e.into()),
        }
        fs::create_dir(staging.join(BLOBS_DIR))?;

        Ok(Box::new(DiskWriter {
            build,
            staging,
            final_dir: build_dir.join(ARCHIVE_DIR),
            entries: BTreeMap::new(),
            committed: false,
        }))
    }

    fn open(&self, build: BuildNumber) -> StoreResult<Option<VirtualFileStore>> {
        let archive = self.archive_dir(build);
        let manifest = match StoreManifest::read_from(&archive.join(MANIFEST_FILE)) {
            Ok(m) => m,
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if manifest.build != build {
            return Err(StoreError::CorruptManifest {
                build,
                reason: format!("manifest belongs to build #{}", manifest.build),
            });
        }
        let entries = manifest.into_entries()?;
        Ok(Some(VirtualFileStore::new(
            build,
            entries,
            ContentSource::Disk(archive.join(BLOBS_DIR)),
        )))
    }

    fn archived_builds(&self) -> StoreResult<Vec<BuildNumber>> {
        let builds_dir = self.builds_dir();
        let read_dir = match fs::read_dir(&builds_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut builds = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<BuildNumber>().ok())
            else {
                continue;
            };
            if entry.path().join(ARCHIVE_DIR).join(MANIFEST_FILE).exists() {
                builds.push(number);
            }
        }
        builds.sort_unstable();
        Ok(builds)
    }

    fn delete(&self, build: BuildNumber) -> StoreResult<DeleteOutcome> {
        let archive = self.archive_dir(build);
        let bytes = StoreManifest::read_from(&archive.join(MANIFEST_FILE))
            .map(|m| m.total_size())
            .unwrap_or(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let doomed = self
            .build_dir(build)
            .join(format!("{}{}-{}", DELETING_PREFIX, std::process::id(), nanos));

        // Hiding the store is the commit point of the deletion
        match fs::rename(&archive, &doomed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(build, "store already absent");
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = fs::remove_dir_all(&doomed) {
            warn!(
                build,
                path = %doomed.display(),
                error = %e,
                "incomplete removal of deleted store; leftover files are unreachable"
            );
        }
        let _ = fs::remove_dir(self.build_dir(build));

        Ok(DeleteOutcome::Deleted { bytes })
    }

    fn purge_leftovers(&self) -> StoreResult<usize> {
        let read_dir = match fs::read_dir(self.builds_dir()) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut purged = 0;
        for entry in read_dir {
            let build_dir = entry?.path();
            let Ok(children) = fs::read_dir(&build_dir) else {
                continue;
            };
            let mut swept = false;
            for child in children.flatten() {
                if !child.file_name().to_string_lossy().starts_with(DELETING_PREFIX) {
                    continue;
                }
                match fs::remove_dir_all(child.path()) {
                    Ok(()) => {
                        purged += 1;
                        swept = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %child.path().display(), error = %e, "leftover of deleted store still not removable");
                    }
                }
            }
            // Untouched build directories may belong to a writer that is starting
            if swept {
                let _ = fs::remove_dir(&build_dir);
            }
        }

        if purged > 0 {
            debug!(purged, "removed leftovers of interrupted deletions");
        }
        Ok(purged)
    }
}

struct DiskWriter {
    build: BuildNumber,
    staging: PathBuf,
    final_dir: PathBuf,
    entries: BTreeMap<String, StoreEntry>,
    committed: bool,
}

impl DiskWriter {
    fn blobs_dir(&self) -> PathBuf {
        self.staging.join(BLOBS_DIR)
    }
}

impl StoreWriter for DiskWriter {
    fn add_file(&mut self, path: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        validate_path(path)?;

        let temp_path = self.blobs_dir().join(format!(".incoming-{}", self.entries.len()));
        let mut out = File::create(&temp_path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size: u64 = 0;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])?;
            size += n as u64;
        }
        out.sync_all()?;
        drop(out);

        let sha256 = hex::encode(hasher.finalize());
        fs::rename(&temp_path, self.blobs_dir().join(&sha256))?;

        self.entries
            .insert(path.to_string(), StoreEntry::File { size, sha256 });
        Ok(size)
    }

    fn add_symlink(&mut self, path: &str, target: &str) -> StoreResult<()> {
        validate_path(path)?;
        self.entries.insert(
            path.to_string(),
            StoreEntry::Symlink {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<VirtualFileStore> {
        let manifest = StoreManifest::new(self.build, &self.entries);
        manifest.write_to(&self.staging.join(MANIFEST_FILE))?;

        match fs::rename(&self.staging, &self.final_dir) {
            Ok(()) => {}
            Err(_) if self.final_dir.exists() => return Err(StoreError::AlreadyArchived(self.build)),
            Err(e) => return Err(e.into()),
        }
        self.committed = true;

        Ok(VirtualFileStore::new(
            self.build,
            std::mem::take(&mut self.entries),
            ContentSource::Disk(self.final_dir.join(BLOBS_DIR)),
        ))
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                warn!(build = self.build, error = %e, "failed to discard staged store");
            }
        }
    }
}
