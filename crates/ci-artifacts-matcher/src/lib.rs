//! Ant-style include/exclude matching for build artifact selection.
//!
//! A [`MatchSpec`] holds the user-facing pattern strings; compiling it yields a
//! [`PathMatcher`] that selects relative paths from a flat candidate list.
//! Matching is a pure function of the candidate set and the patterns: nothing
//! here touches the filesystem.
//!
//! Pattern dialect:
//! - several patterns may be given in one string, separated by commas
//! - `*` and `?` never cross a `/`; `**` matches zero or more path segments
//! - a pattern ending in `/` selects everything under that directory
//! - `\` is accepted as a separator and normalised to `/`

mod defaults;

pub use defaults::DEFAULT_EXCLUDES;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Errors raised while compiling patterns.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("no include patterns given")]
    NoIncludePatterns,
}

fn default_true() -> bool {
    true
}

/// Include/exclude specification as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Comma-separated include patterns
    pub artifacts: String,

    /// Comma-separated exclude patterns
    #[serde(default)]
    pub excludes: String,

    /// OR the built-in VCS/editor exclusions into `excludes`
    #[serde(default = "default_true")]
    pub default_excludes: bool,

    /// Match path case exactly
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl MatchSpec {
    /// Create a spec with the given include patterns and default flags.
    pub fn new(artifacts: impl Into<String>) -> Self {
        Self {
            artifacts: artifacts.into(),
            excludes: String::new(),
            default_excludes: true,
            case_sensitive: true,
        }
    }

    /// Set the exclude patterns.
    pub fn with_excludes(mut self, excludes: impl Into<String>) -> Self {
        self.excludes = excludes.into();
        self
    }

    /// Enable or disable the built-in exclusions.
    pub fn with_default_excludes(mut self, enabled: bool) -> Self {
        self.default_excludes = enabled;
        self
    }

    /// Enable or disable case-sensitive matching.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Compile into a matcher. Fails on an empty include list or a malformed pattern.
    pub fn compile(&self) -> Result<PathMatcher, MatchError> {
        let includes = split_patterns(&self.artifacts);
        if includes.is_empty() {
            return Err(MatchError::NoIncludePatterns);
        }
        let excludes = split_patterns(&self.excludes);

        let include_set = build_set(includes.iter().map(String::as_str), self.case_sensitive)?;
        let user_exclude_set = build_set(excludes.iter().map(String::as_str), self.case_sensitive)?;
        let exclude_set = if self.default_excludes {
            build_set(
                excludes
                    .iter()
                    .map(String::as_str)
                    .chain(DEFAULT_EXCLUDES.iter().copied()),
                self.case_sensitive,
            )?
        } else {
            user_exclude_set.clone()
        };

        Ok(PathMatcher {
            includes,
            excludes,
            case_sensitive: self.case_sensitive,
            include_set,
            user_exclude_set,
            exclude_set,
        })
    }
}

/// Compiled include/exclude matcher.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    includes: Vec<String>,
    excludes: Vec<String>,
    case_sensitive: bool,
    include_set: GlobSet,
    user_exclude_set: GlobSet,
    exclude_set: GlobSet,
}

impl PathMatcher {
    /// Normalised include patterns.
    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    /// Normalised user exclude patterns (built-in exclusions not listed).
    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// A path is selected if it matches an include and no exclude.
    pub fn is_match(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.include_set.is_match(path.as_str()) && !self.exclude_set.is_match(path.as_str())
    }

    /// Select the matching paths from `candidates`, preserving input order.
    pub fn select<'a, I>(&self, candidates: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates.into_iter().filter(|p| self.is_match(p)).collect()
    }

    /// Explain why nothing was selected from `candidates`, if a near miss exists.
    ///
    /// Returns a hint when an include pattern would match under `**/`, or when
    /// every include match was removed by the user's excludes.
    pub fn explain_no_match<'a, I>(&self, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let candidates: Vec<String> = candidates.into_iter().map(normalize_path).collect();

        if !self.excludes.is_empty()
            && candidates.iter().any(|p| {
                self.include_set.is_match(p.as_str()) && self.user_exclude_set.is_match(p.as_str())
            })
        {
            return Some(format!(
                "'{}' matches files, but all of them are excluded by '{}'",
                self.includes.join(","),
                self.excludes.join(",")
            ));
        }

        for pattern in self.includes.iter().filter(|p| !p.starts_with("**/")) {
            let widened = format!("**/{}", pattern);
            let Ok(set) = build_set(std::iter::once(widened.as_str()), self.case_sensitive) else {
                continue;
            };
            if candidates.iter().any(|p| set.is_match(p.as_str())) {
                return Some(format!(
                    "'{}' doesn't match anything, but '{}' does",
                    pattern, widened
                ));
            }
        }

        None
    }
}

/// Split a comma-separated pattern string into normalised patterns.
pub fn split_patterns(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_pattern)
        .collect()
}

/// Normalise one pattern: `\` becomes `/`, a leading `./` is dropped and a
/// trailing `/` expands to `/**`.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut pattern = pattern.replace('\\', "/");
    while let Some(rest) = pattern.strip_prefix("./") {
        pattern = rest.to_string();
    }
    if pattern.ends_with('/') {
        pattern.push_str("**");
    }
    pattern
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").trim_matches('/').to_string()
}

fn build_set<'a, I>(patterns: I, case_sensitive: bool) -> Result<GlobSet, MatchError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|source| MatchError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| MatchError::InvalidPattern {
        pattern: String::new(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(spec: &MatchSpec, paths: &[&'static str]) -> Vec<&'static str> {
        spec.compile().unwrap().select(paths.iter().copied())
    }

    #[test]
    fn test_plain_name_matches_only_root() {
        let spec = MatchSpec::new("f");
        assert_eq!(select(&spec, &["f", "dir/f", "ff"]), vec!["f"]);
    }

    #[test]
    fn test_trailing_slash_selects_subtree() {
        let spec = MatchSpec::new("dir/");
        assert_eq!(
            select(&spec, &["dir/subdir1", "dir/subdir2/file", "other/file", "dir"]),
            vec!["dir/subdir1", "dir/subdir2/file"]
        );
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let spec = MatchSpec::new("*.log");
        assert_eq!(select(&spec, &["a.log", "sub/b.log"]), vec!["a.log"]);
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let spec = MatchSpec::new("**/*.log");
        assert_eq!(select(&spec, &["a.log", "sub/deep/b.log", "c.txt"]), vec!["a.log", "sub/deep/b.log"]);
    }

    #[test]
    fn test_comma_separated_patterns() {
        let spec = MatchSpec::new(" dist/**, *.log ");
        assert_eq!(
            select(&spec, &["dist/app", "build.log", "src/main.rs"]),
            vec!["dist/app", "build.log"]
        );
    }

    #[test]
    fn test_user_excludes() {
        let spec = MatchSpec::new("**").with_excludes("**/*.tmp");
        assert_eq!(select(&spec, &["a.txt", "b/c.tmp"]), vec!["a.txt"]);
    }

    #[test]
    fn test_default_excludes_on() {
        let spec = MatchSpec::new("**");
        assert_eq!(
            select(&spec, &[".svn/file", "dir/.svn/file", "dir/file", ".git/HEAD"]),
            vec!["dir/file"]
        );
    }

    #[test]
    fn test_default_excludes_off() {
        let spec = MatchSpec::new("**").with_default_excludes(false);
        assert_eq!(
            select(&spec, &[".svn/file", "dir/.svn/file", "dir/file"]),
            vec![".svn/file", "dir/.svn/file", "dir/file"]
        );
    }

    #[test]
    fn test_case_insensitive() {
        let spec = MatchSpec::new("*.TXT").with_case_sensitive(false);
        assert_eq!(select(&spec, &["a.txt", "B.Txt"]), vec!["a.txt", "B.Txt"]);

        let spec = MatchSpec::new("*.TXT");
        assert!(select(&spec, &["a.txt"]).is_empty());
    }

    #[test]
    fn test_backslash_and_dot_prefix_normalised() {
        let spec = MatchSpec::new(".\\out\\*.bin");
        assert_eq!(spec.compile().unwrap().includes(), ["out/*.bin"]);
        assert_eq!(select(&spec, &["out/a.bin"]), vec!["out/a.bin"]);
    }

    #[test]
    fn test_empty_include_rejected() {
        let err = MatchSpec::new(" , ").compile().unwrap_err();
        assert!(matches!(err, MatchError::NoIncludePatterns));
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        let err = MatchSpec::new("dist/[").compile().unwrap_err();
        match err {
            MatchError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "dist/["),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hint_for_nested_match() {
        let matcher = MatchSpec::new("f").compile().unwrap();
        let hint = matcher.explain_no_match(["dir/f"]).unwrap();
        assert!(hint.contains("'**/f'"), "{hint}");
    }

    #[test]
    fn test_hint_for_excluded_match() {
        let matcher = MatchSpec::new("*.log").with_excludes("*.log").compile().unwrap();
        let hint = matcher.explain_no_match(["a.log"]).unwrap();
        assert!(hint.contains("excluded"), "{hint}");
    }

    #[test]
    fn test_no_hint_when_nothing_close() {
        let matcher = MatchSpec::new("f").compile().unwrap();
        assert!(matcher.explain_no_match(["g", "dir/h"]).is_none());
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: MatchSpec = serde_json::from_str(r#"{"artifacts":"f"}"#).unwrap();
        assert_eq!(spec, MatchSpec::new("f"));
    }
}
