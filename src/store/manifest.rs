//! On-disk store manifest (manifest.json)
//!
//! The manifest lists every record of a build's store. It is written last,
//! so its presence is the proof that the store is complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{validate_path, StoreEntry, StoreError, StoreResult};
use crate::build::BuildNumber;

/// Schema version for manifest.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "ci-artifacts/store_manifest@1";

/// Entry type in the store manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestEntryType {
    File,
    Symlink,
}

/// A single record in the store manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path within the store
    pub path: String,

    /// Type of record
    #[serde(rename = "type")]
    pub entry_type: ManifestEntryType,

    /// Size in bytes (0 for symlinks)
    pub size: u64,

    /// SHA-256 of file contents (files only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Raw link target (symlinks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Store manifest (manifest.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Build that owns the store
    pub build: BuildNumber,

    /// When the store was committed
    pub created_at: DateTime<Utc>,

    /// Records, sorted by path
    pub entries: Vec<ManifestEntry>,
}

impl StoreManifest {
    /// Build a manifest from store records.
    pub fn new(build: BuildNumber, entries: &BTreeMap<String, StoreEntry>) -> Self {
        let entries = entries
            .iter()
            .map(|(path, entry)| match entry {
                StoreEntry::File { size, sha256 } => ManifestEntry {
                    path: path.clone(),
                    entry_type: ManifestEntryType::File,
                    size: *size,
                    sha256: Some(sha256.clone()),
                    target: None,
                },
                StoreEntry::Symlink { target } => ManifestEntry {
                    path: path.clone(),
                    entry_type: ManifestEntryType::Symlink,
                    size: 0,
                    sha256: None,
                    target: Some(target.clone()),
                },
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            build,
            created_at: Utc::now(),
            entries,
        }
    }

    /// Sum of blob sizes, each distinct hash counted once.
    pub fn total_size(&self) -> u64 {
        let blobs: BTreeMap<&str, u64> = self
            .entries
            .iter()
            .filter_map(|e| e.sha256.as_deref().map(|sha| (sha, e.size)))
            .collect();
        blobs.values().sum()
    }

    /// Convert back into store records, validating every entry.
    pub fn into_entries(self) -> StoreResult<BTreeMap<String, StoreEntry>> {
        let build = self.build;
        let corrupt = |reason: String| StoreError::CorruptManifest { build, reason };

        if self.schema_id != SCHEMA_ID {
            return Err(corrupt(format!("unsupported schema '{}'", self.schema_id)));
        }

        let mut entries = BTreeMap::new();
        for e in self.entries {
            validate_path(&e.path).map_err(|_| corrupt(format!("invalid path '{}'", e.path)))?;
            let entry = match e.entry_type {
                ManifestEntryType::File => {
                    let sha256 = e
                        .sha256
                        .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
                        .ok_or_else(|| corrupt(format!("file '{}' has no valid sha256", e.path)))?;
                    StoreEntry::File {
                        size: e.size,
                        sha256,
                    }
                }
                ManifestEntryType::Symlink => StoreEntry::Symlink {
                    target: e
                        .target
                        .ok_or_else(|| corrupt(format!("symlink '{}' has no target", e.path)))?,
                },
            };
            if entries.insert(e.path.clone(), entry).is_some() {
                return Err(corrupt(format!("duplicate path '{}'", e.path)));
            }
        }
        Ok(entries)
    }

    /// Read a manifest from file.
    pub fn read_from(path: &Path) -> StoreResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write a manifest to file (temp file + rename).
    pub fn write_to(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
