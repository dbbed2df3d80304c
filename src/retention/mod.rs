//! Reclaiming artifacts of older builds
//!
//! After build N archives, the project keeps artifacts for:
//! - N and N-1
//! - the last SUCCESS build numbered below N
//! - the last SUCCESS-or-UNSTABLE build numbered below N
//!
//! Every other archived build numbered below N loses its store. Anchors are a
//! snapshot taken from history before the pass starts, so N's own outcome is
//! only recognised by the pass of a later build. Builds numbered above N are
//! left to their own passes.
//!
//! Passes for the same project serialise on the project's reconcile lock and
//! may run any number of times: a store that is already gone counts as done.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::build::BuildNumber;
use crate::history::BuildHistory;
use crate::project::Project;
use crate::store::{DeleteOutcome, StoreResult};

/// Outcome-based anchors as seen by one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Anchors {
    /// Last SUCCESS build below the cursor
    pub last_successful: Option<BuildNumber>,
    /// Last SUCCESS or UNSTABLE build below the cursor
    pub last_stable: Option<BuildNumber>,
}

impl Anchors {
    /// Compute anchors from builds numbered strictly below `cursor`.
    pub fn before(history: &BuildHistory, cursor: BuildNumber) -> Self {
        Self {
            last_successful: history.last_successful_before(cursor),
            last_stable: history.last_stable_before(cursor),
        }
    }
}

/// Build numbers whose artifacts survive a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeepSet(BTreeSet<BuildNumber>);

impl KeepSet {
    pub fn compute(current: BuildNumber, anchors: &Anchors) -> Self {
        let candidates = [
            Some(current),
            current.checked_sub(1),
            anchors.last_successful,
            anchors.last_stable,
        ];
        Self(candidates.into_iter().flatten().filter(|n| *n > 0).collect())
    }

    pub fn contains(&self, build: BuildNumber) -> bool {
        self.0.contains(&build)
    }

    pub fn iter(&self) -> impl Iterator<Item = BuildNumber> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Build the pass ran for
    pub build: BuildNumber,
    /// Anchor snapshot used
    pub anchors: Anchors,
    /// Builds protected by this pass
    pub keep: KeepSet,
    /// Number of archived builds examined
    pub scanned: usize,
    /// Builds whose stores were removed (or would be, in dry-run)
    pub deleted: Vec<BuildNumber>,
    /// Builds already removed by a concurrent pass
    pub already_absent: Vec<BuildNumber>,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Per-build deletion failures (non-fatal)
    pub failures: Vec<(BuildNumber, String)>,
    /// Leftovers of earlier interrupted deletions swept by this pass
    pub purged_leftovers: usize,
    /// No store was actually deleted
    pub dry_run: bool,
}

/// Applies the keep-set policy to a project's stores.
#[derive(Debug, Clone, Default)]
pub struct RetentionEngine {
    dry_run: bool,
}

impl RetentionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log what would be deleted without deleting.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile after build `current`, taking the anchor snapshot from the
    /// project's history as it stands now.
    pub fn reconcile(&self, project: &Project, current: BuildNumber) -> StoreResult<ReconcileReport> {
        let anchors = project.anchors_before(current);
        self.reconcile_with(project, current, anchors)
    }

    /// Reconcile after build `current` using an explicit anchor snapshot.
    pub fn reconcile_with(
        &self,
        project: &Project,
        current: BuildNumber,
        anchors: Anchors,
    ) -> StoreResult<ReconcileReport> {
        let keep = KeepSet::compute(current, &anchors);
        let mut report = ReconcileReport {
            build: current,
            anchors,
            keep,
            dry_run: self.dry_run,
            ..Default::default()
        };

        let _guard = project.lock_reconcile();
        let store = project.store();
        if !self.dry_run {
            match store.purge_leftovers() {
                Ok(purged) => report.purged_leftovers = purged,
                Err(e) => {
                    warn!(project = project.name(), error = %e, "failed to sweep leftovers of deleted stores");
                }
            }
        }
        let archived = store.archived_builds()?;
        report.scanned = archived.len();

        for build in archived {
            if build >= current || report.keep.contains(build) {
                continue;
            }

            if self.dry_run {
                info!(project = project.name(), build, "DRY-RUN: would delete old artifacts from #{}", build);
                report.deleted.push(build);
                continue;
            }

            match store.delete(build) {
                Ok(DeleteOutcome::Deleted { bytes }) => {
                    info!(project = project.name(), build, bytes, "Deleting old artifacts from #{}", build);
                    report.deleted.push(build);
                    report.bytes_reclaimed += bytes;
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    debug!(project = project.name(), build, "artifacts already deleted by a concurrent pass");
                    report.already_absent.push(build);
                }
                Err(e) => {
                    warn!(project = project.name(), build, error = %e, "failed to delete old artifacts");
                    report.failures.push((build, e.to_string()));
                }
            }
        }

        debug!(
            project = project.name(),
            build = current,
            kept = ?report.keep,
            deleted = report.deleted.len(),
            "reconciliation finished"
        );
        Ok(report)
    }
}
