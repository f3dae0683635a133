//! Glob-based cleanup of the publishing branch.
//!
//! Pattern syntax:
//! - `*` matches within one path segment, `**` across segments, `?` one character
//! - a trailing `/` restricts the pattern to directories
//! - patterns without `/` match the entry's base name at any depth,
//!   others match the path relative to the branch root
//!
//! `.git` is never touched. A preserved entry is kept even when a removal
//! pattern matches it, and a preserved directory is not descended into. A
//! removed directory that holds preserved entries is emptied instead of
//! deleted: everything in it except the preserved entries goes.

use crate::deploy::traits::CleanupEngine;
use crate::error::{CovpagesError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug)]
struct GlobPattern {
    regex: Regex,
    dir_only: bool,
    anchored: bool,
}

impl GlobPattern {
    fn compile(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let dir_only = trimmed.ends_with('/');
        let body = trimmed.trim_matches('/');
        if body.is_empty() {
            return Err(CovpagesError::Config {
                message: format!("empty cleanup pattern: {:?}", pattern),
            });
        }

        let mut re = String::from("^");
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    re.push_str(".*");
                }
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| CovpagesError::Config {
            message: format!("invalid cleanup pattern {:?}: {}", pattern, e),
        })?;
        Ok(Self {
            regex,
            dir_only,
            anchored: body.contains('/'),
        })
    }

    fn matches(&self, rel_path: &str, name: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let subject = if self.anchored { rel_path } else { name };
        self.regex.is_match(subject)
    }
}

fn walk_error(dir: &Path, e: walkdir::Error) -> CovpagesError {
    CovpagesError::Io {
        message: format!("Failed to walk {}: {}", dir.display(), e),
        path: e.path().map(Path::to_path_buf),
        source: e.into_io_error(),
    }
}

fn relative(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_preserved(preserve: &[GlobPattern], rel: &str, name: &str, is_dir: bool) -> bool {
    preserve.iter().any(|p| p.matches(rel, name, is_dir))
}

/// Whether anything below `subdir` is preserved.
fn holds_preserved(dir: &Path, subdir: &Path, preserve: &[GlobPattern]) -> Result<bool> {
    for entry in WalkDir::new(subdir).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        let name = entry.file_name().to_string_lossy();
        let rel = relative(dir, entry.path());
        if is_preserved(preserve, &rel, &name, entry.file_type().is_dir()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compile_all(patterns: &[String]) -> Result<Vec<GlobPattern>> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| GlobPattern::compile(p))
        .collect()
}

/// Default [`CleanupEngine`].
#[derive(Debug, Default, Clone)]
pub struct PatternCleanupEngine;

impl PatternCleanupEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CleanupEngine for PatternCleanupEngine {
    fn cleanup_files(&self, dir: &Path, remove: &[String], preserve: &[String]) -> Result<usize> {
        let remove = compile_all(remove)?;
        let preserve = compile_all(preserve)?;
        if remove.is_empty() {
            return Ok(0);
        }

        let mut targets = Vec::new();
        // Removed directories being emptied rather than deleted.
        let mut emptying: Vec<PathBuf> = Vec::new();
        let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| walk_error(dir, e))?;

            let is_dir = entry.file_type().is_dir();
            let name = entry.file_name().to_string_lossy();
            if name == ".git" {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            let rel = relative(dir, entry.path());
            if is_preserved(&preserve, &rel, &name, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            while emptying
                .last()
                .is_some_and(|parent| !entry.path().starts_with(parent))
            {
                emptying.pop();
            }

            let doomed = !emptying.is_empty() || remove.iter().any(|p| p.matches(&rel, &name, is_dir));
            if !doomed {
                continue;
            }

            if is_dir {
                if holds_preserved(dir, entry.path(), &preserve)? {
                    debug!(path = %rel, "Directory holds preserved entries, emptying it");
                    emptying.push(entry.path().to_path_buf());
                    continue;
                }
                walker.skip_current_dir();
            }
            targets.push((entry.path().to_path_buf(), is_dir));
        }

        for (path, is_dir) in &targets {
            let removed = if *is_dir {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            removed.map_err(|e| CovpagesError::io_with_path(e, path))?;
            debug!(path = %path.display(), "Removed");
        }
        Ok(targets.len())
    }
}
