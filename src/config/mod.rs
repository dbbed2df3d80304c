//! Project archiving configuration
//!
//! Loaded from TOML (default `.ci/artifacts.toml`):
//!
//! ```toml
//! [archive]
//! artifacts = "dist/**, *.log"
//! excludes = ""
//! default_excludes = true
//! case_sensitive = true
//! only_if_successful = false
//! allow_empty_archive = false
//! skip_if_build_failed = false
//!
//! [retention]
//! latest_only = true
//! dry_run = false
//! ```

use ci_artifacts_matcher::{MatchError, MatchSpec, PathMatcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Default config path relative to the workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".ci/artifacts.toml";

/// Errors for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid archive patterns: {0}")]
    Patterns(#[from] MatchError),
}

fn default_true() -> bool {
    true
}

/// Settings for one archiving invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Include/exclude patterns
    #[serde(flatten)]
    pub patterns: MatchSpec,

    /// Archive only when the build outcome is SUCCESS
    #[serde(default)]
    pub only_if_successful: bool,

    /// An empty selection is not a failure
    #[serde(default)]
    pub allow_empty_archive: bool,

    /// Do nothing at all for a FAILURE build
    #[serde(default)]
    pub skip_if_build_failed: bool,
}

impl ArchiveConfig {
    pub fn new(artifacts: impl Into<String>) -> Self {
        Self {
            patterns: MatchSpec::new(artifacts),
            only_if_successful: false,
            allow_empty_archive: false,
            skip_if_build_failed: false,
        }
    }

    pub fn with_excludes(mut self, excludes: impl Into<String>) -> Self {
        self.patterns = self.patterns.with_excludes(excludes);
        self
    }

    pub fn with_default_excludes(mut self, enabled: bool) -> Self {
        self.patterns = self.patterns.with_default_excludes(enabled);
        self
    }

    pub fn with_only_if_successful(mut self, enabled: bool) -> Self {
        self.only_if_successful = enabled;
        self
    }

    pub fn with_allow_empty_archive(mut self, enabled: bool) -> Self {
        self.allow_empty_archive = enabled;
        self
    }

    pub fn with_skip_if_build_failed(mut self, enabled: bool) -> Self {
        self.skip_if_build_failed = enabled;
        self
    }

    /// Compile the patterns. Malformed patterns are rejected here, before any I/O.
    pub fn matcher(&self) -> Result<PathMatcher, MatchError> {
        self.patterns.compile()
    }
}

/// Settings for reclaiming old artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Reconcile after every successful archive
    #[serde(default = "default_true")]
    pub latest_only: bool,

    /// Compute and log the keep-set but delete nothing
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            latest_only: true,
            dry_run: false,
        }
    }
}

/// Full project configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl ProjectConfig {
    /// Parse from a TOML string and validate the patterns.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProjectConfig = toml::from_str(content)?;
        config.archive.matcher()?;
        Ok(config)
    }

    /// Load from a TOML file and validate the patterns.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
