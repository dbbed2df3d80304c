//! Built-in exclusions for version-control metadata and editor droppings.
//!
//! Follows the Ant default-exclude list. Directory entries appear twice so the
//! directory node itself is excluded along with everything below it.

/// Patterns OR-ed into the exclude set when default excludes are enabled.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // Editor backups and lock files
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    // CVS
    "**/CVS",
    "**/CVS/**",
    "**/.cvsignore",
    // Subversion
    "**/.svn",
    "**/.svn/**",
    // Git
    "**/.git",
    "**/.git/**",
    "**/.gitattributes",
    "**/.gitignore",
    "**/.gitmodules",
    // Mercurial
    "**/.hg",
    "**/.hg/**",
    "**/.hgignore",
    "**/.hgsub",
    "**/.hgsubstate",
    "**/.hgtags",
    // Bazaar
    "**/.bzr",
    "**/.bzr/**",
    "**/.bzrignore",
    // SCCS, darcs, arch
    "**/SCCS",
    "**/SCCS/**",
    "**/_darcs",
    "**/_darcs/**",
    "**/.arch-ids",
    "**/.arch-ids/**",
    "**/[{]arch[}]",
    "**/[{]arch[}]/**",
    // Visual SourceSafe
    "**/vssver.scc",
    // macOS
    "**/.DS_Store",
];
