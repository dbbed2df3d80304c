//! In-memory artifact store

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::sync::Arc;

use super::{
    validate_path, ArtifactStore, ContentSource, DeleteOutcome, StoreEntry, StoreError,
    StoreResult, StoreWriter, VirtualFileStore,
};
use crate::build::BuildNumber;

#[derive(Debug, Default)]
struct Inner {
    stores: BTreeMap<BuildNumber, VirtualFileStore>,
    pending: BTreeSet<BuildNumber>,
}

/// Artifact store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<Inner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn begin(&self, build: BuildNumber) -> StoreResult<Box<dyn StoreWriter + '_>> {
        let mut inner = self.inner.write();
        if inner.stores.contains_key(&build) || !inner.pending.insert(build) {
            return Err(StoreError::AlreadyArchived(build));
        }
        Ok(Box::new(MemoryWriter {
            store: self,
            build,
            entries: BTreeMap::new(),
            blobs: HashMap::new(),
            committed: false,
        }))
    }

    fn open(&self, build: BuildNumber) -> StoreResult<Option<VirtualFileStore>> {
        Ok(self.inner.read().stores.get(&build).cloned())
    }

    fn archived_builds(&self) -> StoreResult<Vec<BuildNumber>> {
        Ok(self.inner.read().stores.keys().copied().collect())
    }

    fn delete(&self, build: BuildNumber) -> StoreResult<DeleteOutcome> {
        match self.inner.write().stores.remove(&build) {
            Some(store) => Ok(DeleteOutcome::Deleted {
                bytes: store.total_size(),
            }),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}

struct MemoryWriter<'a> {
    store: &'a MemoryArtifactStore,
    build: BuildNumber,
    entries: BTreeMap<String, StoreEntry>,
    blobs: HashMap<String, Arc<[u8]>>,
    committed: bool,
}

impl StoreWriter for MemoryWriter<'_> {
    fn add_file(&mut self, path: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        validate_path(path)?;
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;

        let sha256 = hex::encode(Sha256::digest(&content));
        let size = content.len() as u64;
        self.blobs
            .entry(sha256.clone())
            .or_insert_with(|| Arc::from(content));
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
        let store = VirtualFileStore::new(
            self.build,
            std::mem::take(&mut self.entries),
            ContentSource::Memory(Arc::new(std::mem::take(&mut self.blobs))),
        );

        let mut inner = self.store.inner.write();
        inner.pending.remove(&self.build);
        inner.stores.insert(self.build, store.clone());
        self.committed = true;
        Ok(store)
    }
}

impl Drop for MemoryWriter<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.inner.write().pending.remove(&self.build);
        }
    }
}
