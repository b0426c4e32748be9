use crate::patterns::Matcher;
use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directories that are never packed: the editor's metadata and git's own.
pub const HOUSEKEEPING_DIRS: &[&str] = &[".vscode", ".git"];

/// The tool's own config files, skipped like the output file.
pub const CONFIG_FILES: &[&str] = &[".codepacker.toml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Relative to the source directory, always `/`-separated.
    pub relative_path: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    pub respect_gitignore: bool,
    pub follow_symlinks: bool,
}

/// Files found under a source directory, sorted by relative path.
#[derive(Debug, Default)]
pub struct Collection {
    entries: Vec<FileEntry>,
    pub walk_errors: usize,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }
}

impl IntoIterator for Collection {
    type Item = FileEntry;
    type IntoIter = std::vec::IntoIter<FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// `path` relative to `base` with forward slashes, if it lives under `base`.
pub fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether a relative path points into housekeeping directories or config files.
pub fn is_housekeeping(relative_path: &str) -> bool {
    let mut parts = relative_path.split('/').peekable();
    while let Some(part) = parts.next() {
        let is_last = parts.peek().is_none();
        if (!is_last && HOUSEKEEPING_DIRS.contains(&part))
            || (is_last && CONFIG_FILES.contains(&part))
        {
            return true;
        }
    }
    false
}

fn is_housekeeping_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_some_and(|ft| ft.is_dir())
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| HOUSEKEEPING_DIRS.contains(&name))
}

/// Regular files, plus unfollowed symlinks whose target is a regular file.
fn is_packable_file(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Some(ft) if ft.is_file() => true,
        Some(ft) if ft.is_symlink() => {
            let resolves = entry.path().is_file();
            if !resolves {
                debug!("Skipping symlink {}", entry.path().display());
            }
            resolves
        }
        _ => false,
    }
}

/// Walks `source_dir` and returns the files that pass `matcher`, skipping
/// housekeeping paths and `output_file` itself.
pub fn collect(
    source_dir: &Path,
    matcher: &Matcher,
    output_file: Option<&Path>,
    options: WalkOptions,
) -> Collection {
    let skip_relative = output_file.and_then(|out| relative_slash_path(source_dir, out));

    let mut builder = WalkBuilder::new(source_dir);
    builder
        .standard_filters(false)
        .hidden(false)
        .follow_links(options.follow_symlinks)
        .filter_entry(|entry| !is_housekeeping_dir(entry));
    if options.respect_gitignore {
        builder
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .ignore(true)
            .parents(true)
            .require_git(false);
    }

    let mut collection = Collection::default();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to process a directory entry: {}", e);
                collection.walk_errors += 1;
                continue;
            }
        };

        if !is_packable_file(&entry) {
            continue;
        }
        let Some(relative_path) = relative_slash_path(source_dir, entry.path()) else {
            continue;
        };
        if skip_relative.as_deref() == Some(relative_path.as_str()) {
            debug!("Skipping output file {}", relative_path);
            continue;
        }
        if is_housekeeping(&relative_path) {
            continue;
        }
        if !matcher.should_include(&relative_path) {
            continue;
        }

        collection.entries.push(FileEntry {
            path: entry.into_path(),
            relative_path,
        });
    }

    collection
        .entries
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    debug!(
        "Collected {} files under {} ({} walk errors)",
        collection.len(),
        source_dir.display(),
        collection.walk_errors
    );
    collection
}
