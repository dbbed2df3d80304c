//! Archiving the outputs of a finished build
//!
//! One call selects workspace files with the configured patterns, copies them
//! into a new write-once store for the build and, when retention is enabled,
//! reconciles the project's older stores.
//!
//! Order of checks:
//! 1. `skip_if_build_failed` and a FAILURE build: skipped
//! 2. `only_if_successful` and a non-SUCCESS build: skipped
//! 3. a build already recorded in history is rejected, even after its store
//!    was reclaimed
//! 4. selection; an empty selection fails unless `allow_empty_archive`
//! 5. copy; any I/O error fails the call
//!
//! Every failure worsens the build outcome to FAILURE.

mod tree;

pub use tree::ArchivePlan;

use ci_artifacts_matcher::{MatchError, PathMatcher};
use serde::Serialize;
use std::io;
use tracing::{debug, info, warn};

use crate::build::{Build, BuildNumber, Outcome};
use crate::config::{ArchiveConfig, RetentionConfig};
use crate::project::Project;
use crate::retention::{ReconcileReport, RetentionEngine};
use crate::store::{StoreError, StoreWriter};
use crate::workspace::Workspace;

/// Errors that fail an archiving call
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    Configuration(#[from] MatchError),

    #[error("No artifacts found that match the file pattern \"{pattern}\". Configuration error?{}", hint_suffix(.hint))]
    NoMatch {
        pattern: String,
        hint: Option<String>,
    },

    #[error("failed to enumerate workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to copy '{path}': {source}")]
    CopyIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),
}

/// Why archiving did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `skip_if_build_failed` and the build failed
    BuildFailed,
    /// `only_if_successful` and the build was not SUCCESS
    NotSuccessful,
}

/// Details of a successful archiving call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveSummary {
    pub build: BuildNumber,
    /// File records written
    pub files: usize,
    /// Symlink records written
    pub symlinks: usize,
    /// Bytes copied
    pub bytes: u64,
    /// Selected directories dropped for having nothing archived under them
    pub pruned_dirs: Vec<String>,
    /// Reconciliation triggered by this archive, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<ReconcileReport>,
}

/// Result of one archiving call.
#[derive(Debug)]
pub enum ArchiveOutcome {
    Succeeded(ArchiveSummary),
    Skipped(SkipReason),
    Failed(ArchiveError),
}

impl ArchiveOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, ArchiveOutcome::Succeeded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ArchiveOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ArchiveOutcome::Failed(_))
    }
}

/// Archiving pipeline for one project configuration.
#[derive(Debug, Clone)]
pub struct Archiver {
    config: ArchiveConfig,
    matcher: PathMatcher,
    retention: RetentionConfig,
}

impl Archiver {
    /// Validate the configuration and compile its patterns.
    pub fn new(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        let matcher = config.matcher()?;
        Ok(Self {
            config,
            matcher,
            retention: RetentionConfig::default(),
        })
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Archive `build`'s selected workspace files into the project.
    ///
    /// On failure the build outcome is worsened to FAILURE.
    pub fn archive(
        &self,
        project: &Project,
        build: &mut Build,
        workspace: &dyn Workspace,
    ) -> ArchiveOutcome {
        if self.config.skip_if_build_failed && build.outcome() == Outcome::Failure {
            info!(project = project.name(), build = build.number(), "Skipped archiving because build failed");
            return ArchiveOutcome::Skipped(SkipReason::BuildFailed);
        }
        if self.config.only_if_successful && build.outcome() != Outcome::Success {
            info!(project = project.name(), build = build.number(), "Skipped archiving because build is not successful");
            return ArchiveOutcome::Skipped(SkipReason::NotSuccessful);
        }

        match self.archive_selected(project, build.number(), workspace) {
            Ok(mut summary) => {
                if self.retention.latest_only {
                    let engine = RetentionEngine::new().with_dry_run(self.retention.dry_run);
                    match engine.reconcile(project, build.number()) {
                        Ok(report) => summary.retention = Some(report),
                        Err(e) => {
                            warn!(project = project.name(), build = build.number(), error = %e, "failed to reclaim old artifacts");
                        }
                    }
                }
                ArchiveOutcome::Succeeded(summary)
            }
            Err(e) => {
                warn!(project = project.name(), build = build.number(), error = %e, "archiving failed");
                build.worsen(Outcome::Failure);
                ArchiveOutcome::Failed(e)
            }
        }
    }

    fn archive_selected(
        &self,
        project: &Project,
        number: BuildNumber,
        workspace: &dyn Workspace,
    ) -> Result<ArchiveSummary, ArchiveError> {
        // Stores are write-once for the life of the build number
        if project.is_recorded(number) {
            return Err(StoreError::AlreadyArchived(number).into());
        }
        info!(project = project.name(), build = number, "Archiving artifacts");

        let entries = workspace.entries().map_err(ArchiveError::Workspace)?;
        let selected: Vec<_> = entries.iter().filter(|e| self.matcher.is_match(&e.path)).collect();
        let plan = ArchivePlan::from_selection(selected);

        for dir in &plan.pruned {
            debug!(build = number, path = %dir, "pruned directory with nothing archived");
        }

        let mut summary = ArchiveSummary {
            build: number,
            pruned_dirs: plan.pruned.clone(),
            ..Default::default()
        };

        if plan.is_empty() {
            if self.config.allow_empty_archive {
                info!(
                    build = number,
                    pattern = %self.config.patterns.artifacts,
                    "No artifacts found that match the file pattern; empty archive allowed"
                );
                return Ok(summary);
            }
            let hint = self
                .matcher
                .explain_no_match(entries.iter().map(|e| e.path.as_str()));
            return Err(ArchiveError::NoMatch {
                pattern: self.config.patterns.artifacts.clone(),
                hint,
            });
        }

        let mut writer = project.store().begin(number)?;
        for path in &plan.files {
            summary.bytes += copy_file(writer.as_mut(), workspace, path)?;
            summary.files += 1;
        }
        for (path, target) in &plan.symlinks {
            writer.add_symlink(path, target)?;
            summary.symlinks += 1;
        }
        writer.commit()?;

        debug!(
            build = number,
            files = summary.files,
            symlinks = summary.symlinks,
            bytes = summary.bytes,
            "archive committed"
        );
        Ok(summary)
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!(" {}", h)).unwrap_or_default()
}

fn copy_file(
    writer: &mut dyn StoreWriter,
    workspace: &dyn Workspace,
    path: &str,
) -> Result<u64, ArchiveError> {
    let copy_err = |source: io::Error| ArchiveError::CopyIo {
        path: path.to_string(),
        source,
    };
    let mut reader = workspace.open(path).map_err(copy_err)?;
    match writer.add_file(path, &mut reader) {
        Ok(n) => Ok(n),
        Err(StoreError::Io(e)) => Err(copy_err(e)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArtifactStore, MemoryArtifactStore};
    use crate::workspace::{MemoryWorkspace, WorkspaceEntry};
    use std::io::Read;
    use std::sync::Arc;

    fn project() -> Project {
        Project::new("p", Arc::new(MemoryArtifactStore::new()))
    }

    #[test]
    fn test_skip_if_build_failed_precedes_everything() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f").with_skip_if_build_failed(true)).unwrap();
        let mut build = Build::new(1, Outcome::Failure);

        // Nothing matches, but the skip wins over the empty-archive failure
        let outcome = archiver.archive(&project, &mut build, &MemoryWorkspace::new());
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::BuildFailed)));
    }

    #[test]
    fn test_only_if_successful_skips_unstable() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f").with_only_if_successful(true)).unwrap();
        let mut build = Build::new(1, Outcome::Unstable);
        let ws = MemoryWorkspace::new().with_file("f", "content");

        let outcome = archiver.archive(&project, &mut build, &ws);
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::NotSuccessful)));
        assert_eq!(build.outcome(), Outcome::Unstable);
        assert!(!project.has_artifacts(1));
    }

    #[test]
    fn test_failed_build_still_archives_without_flags() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f")).unwrap();
        let mut build = Build::new(1, Outcome::Failure);
        let ws = MemoryWorkspace::new().with_file("f", "content");

        assert!(archiver.archive(&project, &mut build, &ws).is_succeeded());
        assert!(project.has_artifacts(1));
    }

    #[test]
    fn test_no_match_fails_build() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f")).unwrap();
        let mut build = Build::new(1, Outcome::Success);
        let ws = MemoryWorkspace::new().with_file("dir/f", "content");

        match archiver.archive(&project, &mut build, &ws) {
            ArchiveOutcome::Failed(ArchiveError::NoMatch { pattern, hint }) => {
                assert_eq!(pattern, "f");
                assert!(hint.unwrap().contains("**/f"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(build.outcome(), Outcome::Failure);
        assert!(!project.has_artifacts(1));
    }

    #[test]
    fn test_allow_empty_archive_succeeds_without_store() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f").with_allow_empty_archive(true)).unwrap();
        let mut build = Build::new(1, Outcome::Success);

        let outcome = archiver.archive(&project, &mut build, &MemoryWorkspace::new());
        assert!(outcome.is_succeeded());
        assert_eq!(build.outcome(), Outcome::Success);
        assert!(!project.has_artifacts(1));
        assert!(project.store().open(1).unwrap().is_none());
    }

    #[test]
    fn test_malformed_pattern_rejected_up_front() {
        assert!(matches!(
            Archiver::new(ArchiveConfig::new("a/[")),
            Err(ArchiveError::Configuration(_))
        ));
    }

    #[test]
    fn test_rearchive_rejected() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f")).unwrap();
        let ws = MemoryWorkspace::new().with_file("f", "content");

        let mut build = Build::new(1, Outcome::Success);
        assert!(archiver.archive(&project, &mut build, &ws).is_succeeded());

        let mut again = Build::new(1, Outcome::Success);
        let outcome = archiver.archive(&project, &mut again, &ws);
        assert!(matches!(
            outcome,
            ArchiveOutcome::Failed(ArchiveError::Store(StoreError::AlreadyArchived(1)))
        ));
        assert_eq!(again.outcome(), Outcome::Failure);
    }

    #[test]
    fn test_completed_build_rejected_without_store() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("f").with_allow_empty_archive(true)).unwrap();

        // Completed with an empty archive, so no store exists
        let mut build = Build::new(1, Outcome::Success);
        assert!(archiver.archive(&project, &mut build, &MemoryWorkspace::new()).is_succeeded());
        project.complete(&build).unwrap();
        assert!(!project.has_artifacts(1));

        let ws = MemoryWorkspace::new().with_file("f", "content");
        let mut again = Build::new(1, Outcome::Success);
        assert!(matches!(
            archiver.archive(&project, &mut again, &ws),
            ArchiveOutcome::Failed(ArchiveError::Store(StoreError::AlreadyArchived(1)))
        ));
        assert!(!project.has_artifacts(1));
    }

    struct BrokenWorkspace;

    impl Workspace for BrokenWorkspace {
        fn entries(&self) -> io::Result<Vec<WorkspaceEntry>> {
            MemoryWorkspace::new().with_file("a", "x").with_file("b", "y").entries()
        }

        fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
            if path == "b" {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                Ok(Box::new(io::Cursor::new(b"x".to_vec())))
            }
        }
    }

    #[test]
    fn test_copy_error_is_fatal_and_leaves_no_store() {
        let project = project();
        let archiver = Archiver::new(ArchiveConfig::new("*")).unwrap();
        let mut build = Build::new(1, Outcome::Success);

        match archiver.archive(&project, &mut build, &BrokenWorkspace) {
            ArchiveOutcome::Failed(ArchiveError::CopyIo { path, .. }) => assert_eq!(path, "b"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(build.outcome(), Outcome::Failure);
        assert!(!project.has_artifacts(1));
        // The aborted writer released the build's slot
        assert!(project.store().begin(1).is_ok());
    }
}
