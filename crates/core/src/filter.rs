//! Include/exclude filters on entry base names
//!
//! Both patterns are regular expressions that must match the whole base
//! name. The include pattern never rejects a directory; the exclude
//! pattern rejects anything it matches.

use regex::Regex;
use std::path::Path;
use tracing::warn;

/// Base-name filter shared by the reconciler and the detector
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl NameFilter {
    /// Filter that accepts everything
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Compile include/exclude patterns
    ///
    /// Empty strings are treated as absent.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Compile patterns, dropping any that fail to parse
    ///
    /// An invalid pattern is logged and behaves as if it were not configured.
    pub fn lenient(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: compile_or_warn("include", include),
            exclude: compile_or_warn("exclude", exclude),
        }
    }

    /// Check a base name
    ///
    /// `is_dir` is `None` when the entry's attributes are unknown (for
    /// instance because it no longer exists); the include pattern is then
    /// not applied.
    pub fn accepts(&self, name: &str, is_dir: Option<bool>) -> bool {
        if let (Some(include), Some(false)) = (&self.include, is_dir) {
            if !include.is_match(name) {
                return false;
            }
        }

        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }

        true
    }

    /// Check a path by its base name
    ///
    /// Paths without a base name (`/`, `..`) are accepted.
    pub fn accepts_path(&self, path: &Path, is_dir: Option<bool>) -> bool {
        match path.file_name() {
            Some(name) => self.accepts(&name.to_string_lossy(), is_dir),
            None => true,
        }
    }

    pub fn has_include(&self) -> bool {
        self.include.is_some()
    }

    pub fn has_exclude(&self) -> bool {
        self.exclude.is_some()
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>, regex::Error> {
    match pattern {
        Some(p) if !p.is_empty() => Ok(Some(Regex::new(&format!("^(?:{})$", p))?)),
        _ => Ok(None),
    }
}

fn compile_or_warn(which: &str, pattern: Option<&str>) -> Option<Regex> {
    match compile(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            warn!("Ignoring invalid {} pattern {:?}: {}", which, pattern.unwrap_or(""), e);
            None
        }
    }
}
