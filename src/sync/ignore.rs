//! Ignore rules for sync operations.
//!
//! Decides whether a relative path participates in sync at all. A fixed
//! built-in set covers version-control metadata, dependency directories,
//! build output, and OS/editor artifacts; a workspace-local ignore file
//! can append further patterns but can never re-include a built-in.

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::error::SyncError;

/// Name of the optional workspace-local ignore file.
pub const IGNORE_FILE_NAME: &str = ".duffelignore";

/// Patterns that are always excluded from sync.
pub const BUILT_IN_PATTERNS: &[&str] = &[
    // Version control
    ".git",
    ".git/**",
    ".svn",
    ".svn/**",
    ".hg",
    ".hg/**",
    // Dependency directories
    "node_modules",
    "node_modules/**",
    ".venv",
    ".venv/**",
    "__pycache__",
    "__pycache__/**",
    "*.pyc",
    "*.pyo",
    // Build output
    "target",
    "target/**",
    "dist",
    "dist/**",
    "build",
    "build/**",
    // OS-specific
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    // Editor artifacts
    ".idea",
    ".idea/**",
    ".vscode",
    ".vscode/**",
    "*.swp",
    "*.swo",
    "*~",
    // Temporary files
    "*.tmp",
    "*.bak",
];

/// Compiled pattern set deciding which paths are excluded from sync.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::built_in()
    }
}

impl IgnoreRules {
    /// Rule set containing only the built-in patterns.
    pub fn built_in() -> Self {
        Self::compile(BUILT_IN_PATTERNS.iter().map(|p| p.to_string()).collect())
    }

    fn compile(patterns: Vec<String>) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();

        for pattern in patterns {
            match Glob::new(&pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    kept.push(pattern);
                }
                Err(err) => warn!(pattern = %pattern, error = %err, "skipping invalid ignore pattern"),
            }
        }

        Self {
            glob_set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns: kept,
        }
    }

    /// Rebuild the rule set from the built-ins plus the workspace ignore
    /// file under `root`, if one exists. Returns the number of workspace
    /// patterns applied. A missing file is not an error; calling again
    /// picks up edits made since the last load.
    pub fn load_workspace(&mut self, root: &Path) -> Result<usize, SyncError> {
        let path = root.join(IGNORE_FILE_NAME);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                *self = Self::built_in();
                return Ok(0);
            }
            Err(source) => return Err(SyncError::IgnoreFile { path, source }),
        };

        let mut patterns: Vec<String> = BUILT_IN_PATTERNS.iter().map(|p| p.to_string()).collect();
        let custom = parse_patterns(&content);
        let count = custom.len();
        patterns.extend(custom);

        *self = Self::compile(patterns);
        Ok(count)
    }

    /// Check whether a workspace-relative path is excluded from sync.
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        if self.glob_set.is_match(relative_path) {
            return true;
        }

        let path = Path::new(relative_path);

        // Bare file-name patterns like ".DS_Store"
        if let Some(name) = path.file_name() {
            if self.glob_set.is_match(name.to_string_lossy().as_ref()) {
                return true;
            }
        }

        // Directory patterns anywhere in the path
        for component in path.components() {
            if let Component::Normal(part) = component {
                if self.glob_set.is_match(part.to_string_lossy().as_ref()) {
                    return true;
                }
            }
        }

        false
    }

    /// Get the active pattern list.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Parse ignore patterns from file content: one per line, blank lines and
/// `#` comments skipped. Negation lines are skipped too, since built-ins
/// cannot be re-included.
fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn built_in_patterns_match() {
        let rules = IgnoreRules::built_in();

        assert!(rules.is_ignored(".git"));
        assert!(rules.is_ignored(".git/HEAD"));
        assert!(rules.is_ignored("sub/.git/config"));
        assert!(rules.is_ignored("node_modules/left-pad/index.js"));
        assert!(rules.is_ignored("src/__pycache__/mod.pyc"));
        assert!(rules.is_ignored(".DS_Store"));
        assert!(rules.is_ignored("docs/.DS_Store"));
        assert!(rules.is_ignored("notes.txt.swp"));

        assert!(!rules.is_ignored("src/main.rs"));
        assert!(!rules.is_ignored("README.md"));
        assert!(!rules.is_ignored("gitlog.txt"));
    }

    #[test]
    fn workspace_file_appends_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(IGNORE_FILE_NAME),
            "# local excludes\n*.log\n\nscratch\n",
        )
        .unwrap();

        let mut rules = IgnoreRules::built_in();
        let count = rules.load_workspace(dir.path()).unwrap();

        assert_eq!(count, 2);
        assert!(rules.is_ignored("debug.log"));
        assert!(rules.is_ignored("scratch/notes.txt"));
        // Built-ins still apply after the reload.
        assert!(rules.is_ignored(".git/HEAD"));
        assert!(!rules.is_ignored("debug.txt"));
    }

    #[test]
    fn missing_workspace_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut rules = IgnoreRules::built_in();

        let count = rules.load_workspace(dir.path()).unwrap();

        assert_eq!(count, 0);
        assert!(rules.is_ignored(".git/HEAD"));
        assert!(!rules.is_ignored("anything.log"));
    }

    #[test]
    fn reload_picks_up_edits() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(IGNORE_FILE_NAME);
        let mut rules = IgnoreRules::built_in();

        fs::write(&file, "*.log\n").unwrap();
        rules.load_workspace(dir.path()).unwrap();
        assert!(rules.is_ignored("debug.log"));

        fs::write(&file, "*.cache\n").unwrap();
        rules.load_workspace(dir.path()).unwrap();
        assert!(!rules.is_ignored("debug.log"));
        assert!(rules.is_ignored("page.cache"));
    }

    #[test]
    fn negation_cannot_override_built_ins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IGNORE_FILE_NAME), "!.git\n!node_modules\n").unwrap();

        let mut rules = IgnoreRules::built_in();
        rules.load_workspace(dir.path()).unwrap();

        assert!(rules.is_ignored(".git/HEAD"));
        assert!(rules.is_ignored("node_modules/pkg/index.js"));
    }
}
