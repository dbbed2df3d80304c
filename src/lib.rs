//! CI build artifact archiving and retention
//!
//! After each build of a project, selected workspace files are copied into a
//! write-once per-build store. Older builds then lose their stores unless they
//! are among the two most recent builds or are the last successful or last
//! stable build as observed before the current one.

pub mod archive;
pub mod build;
pub mod config;
pub mod history;
pub mod lock;
pub mod project;
pub mod retention;
pub mod store;
pub mod workspace;

pub use archive::{ArchiveError, ArchiveOutcome, ArchiveSummary, Archiver, SkipReason};
pub use build::{Build, BuildNumber, Outcome};
pub use config::{ArchiveConfig, ProjectConfig, RetentionConfig};
pub use history::BuildHistory;
pub use project::Project;
pub use retention::{Anchors, KeepSet, ReconcileReport, RetentionEngine};
pub use store::{
    ArtifactStore, DiskArtifactStore, MemoryArtifactStore, StoreEntry, StoreError, VirtualFileStore,
};
pub use workspace::{DirWorkspace, MemoryWorkspace, Workspace};
