//! Ignore patterns for the change watcher.
//!
//! Patterns come from four sources: hard-coded defaults, `.gitignore`
//! (when enabled), a project-level `.codeindexignore`, and runtime
//! additions. Each pattern carries a priority in [0, 1000]; the defaults
//! cannot be disabled.

use std::path::Path;

use globset::Glob;
use globset::GlobMatcher;

use crate::error::IndexErr;
use crate::error::Result;

/// Priority assigned to the non-disableable defaults.
pub const DEFAULT_PRIORITY: u32 = 1000;

/// Priority for patterns read from ignore files.
pub const FILE_PRIORITY: u32 = 500;

/// Priority for runtime-added patterns.
pub const RUNTIME_PRIORITY: u32 = 100;

/// Directories no watcher should ever index.
const DEFAULT_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/dist/**",
    "**/build/**",
    "**/target/**",
    "**/out/**",
    "**/.codeindex/**",
];

struct IgnorePattern {
    raw: String,
    matcher: GlobMatcher,
    priority: u32,
    /// Defaults cannot be removed or disabled.
    builtin: bool,
}

/// Priority-ordered ignore set.
pub struct IgnoreSet {
    patterns: Vec<IgnorePattern>,
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl IgnoreSet {
    /// Only the hard-coded defaults.
    pub fn with_defaults() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|raw| {
                Glob::new(raw).ok().map(|glob| IgnorePattern {
                    raw: (*raw).to_string(),
                    matcher: glob.compile_matcher(),
                    priority: DEFAULT_PRIORITY,
                    builtin: true,
                })
            })
            .collect();
        Self { patterns }
    }

    /// Load the full stack for a project root: defaults, `.gitignore`
    /// (when enabled), `.codeindexignore`, then user patterns.
    pub fn for_project(root: &Path, use_gitignore: bool, user_patterns: &[String]) -> Self {
        let mut set = Self::with_defaults();
        if use_gitignore {
            set.load_ignore_file(&root.join(".gitignore"));
        }
        set.load_ignore_file(&root.join(".codeindexignore"));
        for pattern in user_patterns {
            if let Err(e) = set.add_runtime(pattern) {
                tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid ignore pattern");
            }
        }
        set
    }

    fn load_ignore_file(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            // Gitignore directory shorthand: `dir/` matches everything
            // beneath it; bare names match at any depth.
            let glob = if let Some(dir) = line.strip_suffix('/') {
                format!("**/{dir}/**")
            } else if line.contains('/') {
                line.trim_start_matches('/').to_string()
            } else {
                format!("**/{line}")
            };
            if let Ok(parsed) = Glob::new(&glob) {
                self.patterns.push(IgnorePattern {
                    raw: line.to_string(),
                    matcher: parsed.compile_matcher(),
                    priority: FILE_PRIORITY,
                    builtin: false,
                });
            }
        }
    }

    /// Add a runtime pattern with the runtime priority.
    pub fn add_runtime(&mut self, pattern: &str) -> Result<()> {
        self.add_with_priority(pattern, RUNTIME_PRIORITY)
    }

    /// Add a pattern with an explicit priority in [0, 1000].
    pub fn add_with_priority(&mut self, pattern: &str, priority: u32) -> Result<()> {
        if priority > 1000 {
            return Err(IndexErr::Validation {
                rule: "ignore.priority".to_string(),
                cause: format!("{priority} outside [0, 1000]"),
            });
        }
        let glob = Glob::new(pattern).map_err(|e| IndexErr::Validation {
            rule: "ignore.pattern".to_string(),
            cause: format!("{pattern:?}: {e}"),
        })?;
        self.patterns.push(IgnorePattern {
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
            priority,
            builtin: false,
        });
        Ok(())
    }

    /// Remove a non-default pattern by its raw text.
    ///
    /// Defaults are not removable; asking to remove one fails.
    pub fn remove(&mut self, pattern: &str) -> Result<()> {
        if DEFAULT_PATTERNS.contains(&pattern) {
            return Err(IndexErr::Validation {
                rule: "ignore.defaults".to_string(),
                cause: format!("default pattern {pattern:?} cannot be disabled"),
            });
        }
        self.patterns.retain(|p| p.builtin || p.raw != pattern);
        Ok(())
    }

    /// Whether a project-relative path is ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matcher.is_match(path))
    }

    /// The matching pattern with the highest priority, if any.
    pub fn matching_pattern(&self, path: &Path) -> Option<(&str, u32)> {
        self.patterns
            .iter()
            .filter(|p| p.matcher.is_match(path))
            .max_by_key(|p| p.priority)
            .map(|p| (p.raw.as_str(), p.priority))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
