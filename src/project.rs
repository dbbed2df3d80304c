//! A project: its build history and the artifact stores of its builds

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;

use crate::build::{Build, BuildNumber};
use crate::history::{BuildHistory, HistoryError};
use crate::retention::Anchors;
use crate::store::{ArtifactStore, StoreError, StoreResult, VirtualFileStore};

/// One project's build history and artifact storage.
///
/// Shared between build-completion threads; all methods take `&self`.
pub struct Project {
    name: String,
    history: RwLock<BuildHistory>,
    store: Arc<dyn ArtifactStore>,
    reconcile_lock: Mutex<()>,
}

impl Project {
    pub fn new(name: impl Into<String>, store: Arc<dyn ArtifactStore>) -> Self {
        Self::with_history(name, store, BuildHistory::new())
    }

    /// Create a project with previously persisted history.
    pub fn with_history(
        name: impl Into<String>,
        store: Arc<dyn ArtifactStore>,
        history: BuildHistory,
    ) -> Self {
        Self {
            name: name.into(),
            history: RwLock::new(history),
            store,
            reconcile_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// Record a build's final outcome.
    pub fn complete(&self, build: &Build) -> Result<(), HistoryError> {
        self.history.write().record(build.number(), build.outcome())
    }

    /// True once `build` has a recorded outcome.
    pub fn is_recorded(&self, build: BuildNumber) -> bool {
        self.history.read().get(build).is_some()
    }

    /// Copy of the current history.
    pub fn history(&self) -> BuildHistory {
        self.history.read().clone()
    }

    /// Anchors as observed by build `current`: only builds numbered below it count.
    pub fn anchors_before(&self, current: BuildNumber) -> Anchors {
        Anchors::before(&self.history.read(), current)
    }

    /// Serialise the deletion phase of concurrent reconciliations.
    pub(crate) fn lock_reconcile(&self) -> MutexGuard<'_, ()> {
        self.reconcile_lock.lock()
    }

    /// True if `build` currently holds archived artifacts.
    pub fn has_artifacts(&self, build: BuildNumber) -> bool {
        self.store.has_artifacts(build)
    }

    /// Open the artifact tree of `build`, if it has one.
    pub fn artifacts(&self, build: BuildNumber) -> StoreResult<Option<VirtualFileStore>> {
        self.store.open(build)
    }

    /// Relative paths of every archived record of `build`; empty if none.
    pub fn list_artifacts(&self, build: BuildNumber) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .open(build)?
            .map(|s| s.paths().map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// Read one archived file of `build`.
    pub fn read_artifact(&self, build: BuildNumber, path: &str) -> StoreResult<Vec<u8>> {
        match self.store.open(build)? {
            Some(store) => store.read(path),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("builds", &self.history.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Outcome;
    use crate::store::MemoryArtifactStore;

    #[test]
    fn test_complete_records_outcome() {
        let project = Project::new("demo", Arc::new(MemoryArtifactStore::new()));
        project.complete(&Build::new(1, Outcome::Success)).unwrap();
        project.complete(&Build::new(2, Outcome::Unstable)).unwrap();

        assert_eq!(project.history().outcome(2), Some(Outcome::Unstable));
        assert!(project.is_recorded(2));
        assert!(!project.is_recorded(3));
        assert!(project.complete(&Build::new(2, Outcome::Success)).is_err());

        let anchors = project.anchors_before(3);
        assert_eq!(anchors.last_successful, Some(1));
        assert_eq!(anchors.last_stable, Some(2));
    }

    #[test]
    fn test_read_api_without_artifacts() {
        let project = Project::new("demo", Arc::new(MemoryArtifactStore::new()));
        assert!(!project.has_artifacts(1));
        assert!(project.list_artifacts(1).unwrap().is_empty());
        assert!(matches!(
            project.read_artifact(1, "f"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_api_with_artifacts() {
        let store = Arc::new(MemoryArtifactStore::new());
        let mut writer = store.begin(1).unwrap();
        writer.add_file("out/app.bin", &mut "bin".as_bytes()).unwrap();
        writer.commit().unwrap();

        let project = Project::new("demo", store);
        assert!(project.has_artifacts(1));
        assert_eq!(project.list_artifacts(1).unwrap(), vec!["out/app.bin"]);
        assert_eq!(project.read_artifact(1, "out/app.bin").unwrap(), b"bin");
    }
}
