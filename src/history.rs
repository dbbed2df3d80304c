//! Completed-build history for a project
//!
//! Append-only record of build numbers and their final outcomes. Builds may
//! complete out of number order when they run concurrently; each number is
//! recorded at most once. Anchor queries are pure functions over this record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::build::{BuildNumber, Outcome};

/// Schema version for history.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "ci-artifacts/history@1";

/// One completed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Build number
    pub number: BuildNumber,

    /// Final outcome
    pub outcome: Outcome,

    /// When the build was recorded as complete
    pub completed_at: DateTime<Utc>,
}

/// Errors for history operations
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("build #{0} is already recorded")]
    AlreadyRecorded(BuildNumber),

    #[error("build number must be positive")]
    ZeroBuildNumber,

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("unsupported history schema '{0}'")]
    UnsupportedSchema(String),
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    schema_version: u32,
    schema_id: String,
    builds: Vec<BuildRecord>,
}

/// Ordered history of completed builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildHistory {
    builds: BTreeMap<BuildNumber, BuildRecord>,
}

impl BuildHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed build.
    pub fn record(&mut self, number: BuildNumber, outcome: Outcome) -> Result<(), HistoryError> {
        if number == 0 {
            return Err(HistoryError::ZeroBuildNumber);
        }
        if self.builds.contains_key(&number) {
            return Err(HistoryError::AlreadyRecorded(number));
        }
        self.builds.insert(
            number,
            BuildRecord {
                number,
                outcome,
                completed_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn get(&self, number: BuildNumber) -> Option<&BuildRecord> {
        self.builds.get(&number)
    }

    pub fn outcome(&self, number: BuildNumber) -> Option<Outcome> {
        self.builds.get(&number).map(|r| r.outcome)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// Highest recorded build number.
    pub fn last_number(&self) -> Option<BuildNumber> {
        self.builds.keys().next_back().copied()
    }

    /// Records in ascending build-number order.
    pub fn iter(&self) -> impl Iterator<Item = &BuildRecord> {
        self.builds.values()
    }

    /// Highest completed build numbered below `cursor` whose outcome satisfies `pred`.
    pub fn last_before<F>(&self, cursor: BuildNumber, pred: F) -> Option<BuildNumber>
    where
        F: Fn(Outcome) -> bool,
    {
        self.builds
            .range(..cursor)
            .rev()
            .find(|(_, r)| pred(r.outcome))
            .map(|(n, _)| *n)
    }

    /// Highest SUCCESS build numbered below `cursor`.
    pub fn last_successful_before(&self, cursor: BuildNumber) -> Option<BuildNumber> {
        self.last_before(cursor, |o| o.is_successful())
    }

    /// Highest SUCCESS or UNSTABLE build numbered below `cursor`.
    pub fn last_stable_before(&self, cursor: BuildNumber) -> Option<BuildNumber> {
        self.last_before(cursor, |o| o.is_stable())
    }

    /// Load from a history.json file. A missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let file: HistoryFile = serde_json::from_str(&content)?;
        if file.schema_id != SCHEMA_ID {
            return Err(HistoryError::UnsupportedSchema(file.schema_id));
        }
        Ok(Self {
            builds: file.builds.into_iter().map(|r| (r.number, r)).collect(),
        })
    }

    /// Write to a history.json file (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let file = HistoryFile {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            builds: self.builds.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
