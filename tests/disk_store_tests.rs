//! End-to-end archiving from a real workspace directory into an on-disk project

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ci_artifacts::history::BuildHistory;
use ci_artifacts::lock::ProjectLock;
use ci_artifacts::store::ArtifactStore;
use ci_artifacts::{
    ArchiveConfig, ArchiveOutcome, Archiver, Build, DirWorkspace, DiskArtifactStore, Outcome,
    Project, ProjectConfig,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn disk_project(root: &Path) -> Project {
    Project::new("demo", Arc::new(DiskArtifactStore::new(root)))
}

#[test]
fn test_archive_workspace_to_disk() {
    let ws_dir = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    write(ws_dir.path(), "dist/app.bin", "binary");
    write(ws_dir.path(), "dist/docs/readme.txt", "docs");
    write(ws_dir.path(), "dist/.git/HEAD", "ref");
    write(ws_dir.path(), "src/main.c", "int main;");
    fs::create_dir_all(ws_dir.path().join("dist/empty")).unwrap();

    let project = disk_project(root.path());
    let archiver = Archiver::new(ArchiveConfig::new("dist/")).unwrap();
    let mut build = Build::new(1, Outcome::Success);

    match archiver.archive(&project, &mut build, &DirWorkspace::new(ws_dir.path())) {
        ArchiveOutcome::Succeeded(summary) => {
            assert_eq!(summary.files, 2);
            assert_eq!(summary.bytes, 10);
            assert!(summary.pruned_dirs.contains(&"dist/empty".to_string()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // A fresh handle on the same root sees the committed store
    let reopened = disk_project(root.path());
    assert_eq!(
        reopened.list_artifacts(1).unwrap(),
        vec!["dist/app.bin", "dist/docs/readme.txt"]
    );
    assert_eq!(reopened.read_artifact(1, "dist/docs/readme.txt").unwrap(), b"docs");
    assert!(root.path().join("builds/1/archive/manifest.json").exists());
    assert!(!root.path().join("builds/1/archive.partial").exists());
}

#[cfg(unix)]
#[test]
fn test_symlink_not_followed() {
    let ws_dir = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    write(ws_dir.path(), "dir/fizz", "contents");
    std::os::unix::fs::symlink("fizz", ws_dir.path().join("dir/lodge")).unwrap();

    let project = disk_project(root.path());
    let archiver = Archiver::new(ArchiveConfig::new("dir/lodge")).unwrap();
    let mut build = Build::new(1, Outcome::Success);

    let outcome = archiver.archive(&project, &mut build, &DirWorkspace::new(ws_dir.path()));
    assert!(outcome.is_succeeded());

    let store = project.artifacts(1).unwrap().unwrap();
    assert_eq!(store.list("dir"), vec!["lodge"]);
    assert!(store.exists("dir/lodge"));
    assert!(!store.exists("dir/fizz"));
}

#[test]
fn test_retention_on_disk() {
    let ws_dir = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    write(ws_dir.path(), "f", "content");
    let workspace = DirWorkspace::new(ws_dir.path());

    let project = disk_project(root.path());
    let archiver = Archiver::new(ArchiveConfig::new("f")).unwrap();
    for n in 1..=4 {
        let mut build = Build::new(n, Outcome::Failure);
        assert!(archiver.archive(&project, &mut build, &workspace).is_succeeded());
        project.complete(&build).unwrap();
    }

    assert_eq!(project.store().archived_builds().unwrap(), vec![3, 4]);
    assert!(!root.path().join("builds/1").exists());
    assert!(!root.path().join("builds/2").exists());
}

#[test]
fn test_reconcile_sweeps_interrupted_deletions() {
    let ws_dir = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    write(ws_dir.path(), "f", "content");

    // A crash between hiding and removing build #1's store
    write(root.path(), "builds/1/archive.deleting-4242-17/blobs/abc", "content");

    let project = disk_project(root.path());
    project.complete(&Build::new(1, Outcome::Failure)).unwrap();
    let archiver = Archiver::new(ArchiveConfig::new("f")).unwrap();
    let mut build = Build::new(2, Outcome::Failure);

    match archiver.archive(&project, &mut build, &DirWorkspace::new(ws_dir.path())) {
        ArchiveOutcome::Succeeded(summary) => {
            let report = summary.retention.expect("reconciliation should run");
            assert_eq!(report.purged_leftovers, 1);
            assert!(report.deleted.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!root.path().join("builds/1").exists());
    assert_eq!(project.store().archived_builds().unwrap(), vec![2]);
}

#[test]
fn test_history_survives_restart() {
    let root = TempDir::new().unwrap();
    let history_path = root.path().join("history.json");

    let project = disk_project(root.path());
    project.complete(&Build::new(1, Outcome::Success)).unwrap();
    project.complete(&Build::new(2, Outcome::Unstable)).unwrap();
    project.history().save(&history_path).unwrap();

    let loaded = BuildHistory::load(&history_path).unwrap();
    let restarted = Project::with_history(
        "demo",
        Arc::new(DiskArtifactStore::new(root.path())),
        loaded,
    );
    let anchors = restarted.anchors_before(3);
    assert_eq!(anchors.last_successful, Some(1));
    assert_eq!(anchors.last_stable, Some(2));
}

#[test]
fn test_config_file_drives_archiver() {
    let ws_dir = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    write(
        ws_dir.path(),
        ".ci/artifacts.toml",
        "[archive]\nartifacts = \"*.log\"\nallow_empty_archive = true\n\n[retention]\nlatest_only = false\n",
    );

    let config = ProjectConfig::load(&ws_dir.path().join(".ci/artifacts.toml")).unwrap();
    let archiver = Archiver::new(config.archive)
        .unwrap()
        .with_retention(config.retention);

    let project = disk_project(root.path());
    let mut build = Build::new(1, Outcome::Success);
    let outcome = archiver.archive(&project, &mut build, &DirWorkspace::new(ws_dir.path()));

    assert!(outcome.is_succeeded());
    assert_eq!(build.outcome(), Outcome::Success);
    assert!(!project.has_artifacts(1));
}

#[test]
fn test_project_lock_serialises_threads() {
    let root = TempDir::new().unwrap();
    let root_path = root.path().to_path_buf();

    let held = ProjectLock::acquire(&root_path, Duration::from_secs(1)).unwrap();
    let waiter = {
        let root_path = root_path.clone();
        thread::spawn(move || ProjectLock::acquire(&root_path, Duration::from_secs(10)).is_ok())
    };

    thread::sleep(Duration::from_millis(100));
    drop(held);
    assert!(waiter.join().expect("Thread panicked"));
}
