use crate::error::PackerError;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Ordered exclusion and inclusion globs for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSet {
    pub exclusions: Vec<String>,
    pub inclusions: Vec<String>,
}

impl PatternSet {
    pub fn new(exclusions: Vec<String>, inclusions: Vec<String>) -> Self {
        Self {
            exclusions,
            inclusions,
        }
    }
}

/// Rewrites a user pattern into the anchored glob that is actually compiled.
/// Returns `None` for patterns that are empty after trimming.
pub fn normalize(pattern: &str) -> Option<String> {
    let mut p = pattern.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    let p = p.trim_start_matches('/');
    if p.is_empty() {
        return None;
    }

    if let Some(dir) = p.strip_suffix('/') {
        return Some(format!("{}/**", dir.trim_end_matches('/')));
    }
    if p.contains('/') || p.starts_with("**") {
        Some(p.to_string())
    } else {
        Some(format!("**/{}", p))
    }
}

fn normalize_path(relative_path: &str) -> String {
    let path = relative_path.replace('\\', "/");
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

/// A single normalized pattern. A pattern that fails to compile is kept
/// around so the set stays non-empty, but it never matches anything.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    compiled: Option<Pattern>,
}

impl GlobPattern {
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = normalize(raw)?;
        let compiled = match Pattern::new(&normalized) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                let err = PackerError::PatternCompileFailed {
                    pattern: raw.to_string(),
                    reason: e.msg.to_string(),
                };
                warn!("{}; it will match nothing", err);
                None
            }
        };
        Some(Self {
            raw: raw.to_string(),
            compiled,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Matches the full path or any of its leading directories.
    pub fn matches(&self, relative_path: &str) -> bool {
        let Some(pattern) = &self.compiled else {
            return false;
        };
        let path = normalize_path(relative_path);
        if pattern.matches_with(&path, MATCH_OPTIONS) {
            return true;
        }
        path.match_indices('/')
            .any(|(idx, _)| pattern.matches_with(&path[..idx], MATCH_OPTIONS))
    }
}

/// Compiled form of a [`PatternSet`], built once per run.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    exclusions: Vec<GlobPattern>,
    inclusions: Vec<GlobPattern>,
}

impl Matcher {
    pub fn new(set: &PatternSet) -> Self {
        Self {
            exclusions: set.exclusions.iter().filter_map(|p| GlobPattern::new(p)).collect(),
            inclusions: set.inclusions.iter().filter_map(|p| GlobPattern::new(p)).collect(),
        }
    }

    pub fn should_include(&self, relative_path: &str) -> bool {
        if let Some(hit) = self.exclusions.iter().find(|p| p.matches(relative_path)) {
            debug!("Excluding {} (exclusion pattern {})", relative_path, hit.raw());
            return false;
        }
        if self.inclusions.is_empty() {
            return true;
        }
        match self.inclusions.iter().find(|p| p.matches(relative_path)) {
            Some(hit) => {
                debug!("Including {} (inclusion pattern {})", relative_path, hit.raw());
                true
            }
            None => {
                debug!("Excluding {} (no inclusion pattern matched)", relative_path);
                false
            }
        }
    }
}

pub fn matches(relative_path: &str, pattern: &str) -> bool {
    GlobPattern::new(pattern).is_some_and(|p| p.matches(relative_path))
}

pub fn should_include(relative_path: &str, set: &PatternSet) -> bool {
    Matcher::new(set).should_include(relative_path)
}
