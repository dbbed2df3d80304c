//! Turning a selection into the records to write
//!
//! Only files and symlinks become records. A selected directory survives only
//! as an ancestor of some selected record; every other selected directory is
//! pruned, including directories whose subdirectories are all empty.

use std::collections::BTreeSet;

use crate::workspace::{EntryKind, WorkspaceEntry};

/// What one archiving call will write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePlan {
    /// Regular files to copy
    pub files: Vec<String>,
    /// Symlinks to record, as (path, raw target)
    pub symlinks: Vec<(String, String)>,
    /// Directories implied by the records
    pub directories: BTreeSet<String>,
    /// Selected directories dropped for having no selected descendant
    pub pruned: Vec<String>,
}

impl ArchivePlan {
    /// Build the plan from the selected workspace entries.
    pub fn from_selection<'a, I>(selected: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkspaceEntry>,
    {
        let mut plan = ArchivePlan::default();
        let mut selected_dirs = Vec::new();

        for entry in selected {
            match &entry.kind {
                EntryKind::File => plan.files.push(entry.path.clone()),
                EntryKind::Symlink { target } => {
                    plan.symlinks.push((entry.path.clone(), target.clone()))
                }
                EntryKind::Directory => selected_dirs.push(entry.path.clone()),
            }
        }

        let leaves = plan
            .files
            .iter()
            .chain(plan.symlinks.iter().map(|(p, _)| p));
        for leaf in leaves {
            let mut end = 0;
            while let Some(pos) = leaf[end..].find('/') {
                end += pos;
                plan.directories.insert(leaf[..end].to_string());
                end += 1;
            }
        }

        plan.pruned = selected_dirs
            .into_iter()
            .filter(|d| !plan.directories.contains(d))
            .collect();
        plan
    }

    /// Number of records to write.
    pub fn len(&self) -> usize {
        self.files.len() + self.symlinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
