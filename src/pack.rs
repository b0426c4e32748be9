use crate::collector::{self, WalkOptions};
use crate::error::{PackerError, PackerResult};
use crate::output;
use crate::patterns::{Matcher, PatternSet};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const GENERATOR: &str = concat!("Code Packer ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct DirectoryJob {
    pub source_directory: PathBuf,
    pub output_file: PathBuf,
    pub patterns: PatternSet,
    pub walk: WalkOptions,
}

#[derive(Debug, Clone)]
pub struct PackOutcome {
    pub text: String,
    pub output_path: PathBuf,
    pub included: usize,
    pub excluded: usize,
    /// Files that matched but could not be read, with the reason.
    pub failures: Vec<(String, String)>,
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn render_header(now: DateTime<Utc>) -> String {
    let mut header = String::from("--- START OF HEADER ---\n");
    header.push_str(&format!("Generated on: {}\n", timestamp(now)));
    header.push_str(&format!("Generated by: {}\n", GENERATOR));
    header.push_str("Purpose: Code packing for analysis or documentation\n");
    header.push_str("--- END OF HEADER ---\n\n");
    header
}

/// Resolves the output path without requiring the file itself to exist, so it
/// can be compared against walked paths.
fn resolve_output_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

pub fn pack(job: &DirectoryJob) -> PackerResult<PackOutcome> {
    pack_at(job, Utc::now())
}

/// Same as [`pack`] with a fixed generation time.
pub fn pack_at(job: &DirectoryJob, now: DateTime<Utc>) -> PackerResult<PackOutcome> {
    let source_dir = fs::canonicalize(&job.source_directory)
        .ok()
        .filter(|p| p.is_dir())
        .ok_or_else(|| PackerError::NoWorkspaceRoot(job.source_directory.clone()))?;
    let output_path = resolve_output_path(&job.output_file);
    debug!("Resolved source directory: {}", source_dir.display());
    debug!("Output file path: {}", output_path.display());

    output::remove_existing(&output_path)?;

    let mut text = render_header(now);

    debug!("Exclusion patterns: {:?}", job.patterns.exclusions);
    debug!("Inclusion patterns: {:?}", job.patterns.inclusions);
    let matcher = Matcher::new(&job.patterns);
    let files = collector::collect(&source_dir, &matcher, Some(&output_path), job.walk);
    if files.is_empty() {
        warn!("No files matched under {}", source_dir.display());
    }

    let mut included = 0;
    let mut excluded = 0;
    let mut failures = Vec::new();

    for entry in files {
        debug!("Processing file: {}", entry.relative_path);
        match fs::read_to_string(&entry.path) {
            Ok(content) => {
                text.push_str(&format!("--- FILE: {} ---\n", entry.relative_path));
                text.push_str(&content);
                text.push_str("\n--- END FILE ---\n\n");
                included += 1;
            }
            Err(source) => {
                let err = PackerError::PerFileReadFailed {
                    path: entry.relative_path.clone(),
                    source,
                };
                warn!("{}", err);
                failures.push((entry.relative_path, err.to_string()));
                excluded += 1;
            }
        }
    }

    info!(
        "Packed {} files ({} excluded) into {}",
        included,
        excluded,
        output_path.display()
    );

    output::write_all(&output_path, &text)?;

    Ok(PackOutcome {
        text,
        output_path,
        included,
        excluded,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(root: &Path, patterns: PatternSet) -> DirectoryJob {
        DirectoryJob {
            source_directory: root.to_path_buf(),
            output_file: root.join("packed.txt"),
            patterns,
            walk: WalkOptions::default(),
        }
    }

    fn without_timestamp(text: &str) -> String {
        text.lines()
            .filter(|l| !l.starts_with("Generated on: "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("src/nested/util.rs"), "pub fn util() {}").unwrap();
        fs::write(root.join("README.md"), "# demo\n").unwrap();
        dir
    }

    #[test]
    fn output_is_framed_and_ordered() {
        let dir = fixture();
        let outcome = pack_at(&job(dir.path(), PatternSet::default()), Utc::now()).unwrap();

        assert!(outcome.text.starts_with("--- START OF HEADER ---\nGenerated on: "));
        assert!(outcome.text.contains(&format!("Generated by: {}\n", GENERATOR)));
        let expected_body = "--- END OF HEADER ---\n\n\
            --- FILE: README.md ---\n# demo\n\n--- END FILE ---\n\n\
            --- FILE: src/main.rs ---\nfn main() {}\n\n--- END FILE ---\n\n\
            --- FILE: src/nested/util.rs ---\npub fn util() {}\n--- END FILE ---\n\n";
        assert!(outcome.text.ends_with(expected_body));
        assert_eq!(outcome.included, 3);
        assert_eq!(outcome.excluded, 0);
        assert_eq!(fs::read_to_string(&outcome.output_path).unwrap(), outcome.text);
    }

    #[test]
    fn repeated_runs_are_identical_apart_from_timestamp() {
        let dir = fixture();
        let job = job(dir.path(), PatternSet::default());

        let first = pack(&job).unwrap();
        let second = pack(&job).unwrap();
        assert_eq!(without_timestamp(&first.text), without_timestamp(&second.text));
        assert!(!second.text.contains("--- FILE: packed.txt ---"));
    }

    #[test]
    fn unreadable_file_is_counted_and_skipped() {
        let dir = fixture();
        fs::write(dir.path().join("src/blob.bin"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let outcome = pack(&job(dir.path(), PatternSet::default())).unwrap();
        assert_eq!(outcome.included, 3);
        assert_eq!(outcome.excluded, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "src/blob.bin");
        assert!(!outcome.text.contains("src/blob.bin"));
        assert!(outcome.text.contains("--- FILE: src/nested/util.rs ---"));
    }

    #[test]
    fn patterns_filter_files() {
        let dir = fixture();
        let patterns = PatternSet::new(vec!["nested".into()], vec!["*.rs".into()]);
        let outcome = pack(&job(dir.path(), patterns)).unwrap();
        assert_eq!(outcome.included, 1);
        assert!(outcome.text.contains("--- FILE: src/main.rs ---"));
        assert!(!outcome.text.contains("README.md"));
    }

    #[test]
    fn stale_output_is_replaced() {
        let dir = fixture();
        let job = job(dir.path(), PatternSet::new(vec![], vec!["README.md".into()]));
        fs::write(&job.output_file, "stale content").unwrap();

        let outcome = pack(&job).unwrap();
        let written = fs::read_to_string(&outcome.output_path).unwrap();
        assert!(!written.contains("stale content"));
        assert!(written.contains("--- FILE: README.md ---"));
    }

    #[test]
    fn missing_source_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir.path().join("missing"), PatternSet::default());
        assert!(matches!(pack(&job), Err(PackerError::NoWorkspaceRoot(_))));
    }

    #[test]
    fn header_timestamp_is_iso_8601() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(render_header(now).contains("Generated on: 2024-05-01T12:30:00.000Z\n"));
    }
}
