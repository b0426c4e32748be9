use crate::collector::is_housekeeping;
use crate::diffstat::{self, DiffStats, SynthKind};
use crate::error::{PackerError, PackerResult};
use crate::output;
use crate::pack::{GENERATOR, timestamp};
use crate::patterns::{Matcher, PatternSet};
use crate::vcs::{ChangeKind, ChangeRecord, VersionControl};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DiffJob {
    pub source_branch: String,
    pub target_branch: String,
    pub output_file: PathBuf,
    pub patterns: PatternSet,
    pub include_binary_files: bool,
    pub include_meta_files: bool,
    pub max_file_size_kb: u64,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub text: String,
    pub output_path: PathBuf,
    pub files: usize,
    pub totals: DiffStats,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug)]
pub enum DiffOutcome {
    Written(DiffReport),
    /// The refs have no differences at all.
    NoChanges,
    /// Every change was removed by the filters.
    AllFiltered,
}

/// Per-file stanza body, before framing.
enum Stanza {
    Content { body: String, stats: DiffStats },
    TooLarge { size: u64, limit_kb: u64 },
    BinarySkipped,
    Binary { size: u64 },
    Failed(String),
}

/// Drops filtered and duplicate changes, keeping the first record per path.
fn select_changes(changes: Vec<ChangeRecord>, job: &DiffJob) -> Vec<ChangeRecord> {
    let matcher = Matcher::new(&job.patterns);
    let mut seen = HashSet::new();

    changes
        .into_iter()
        .filter(|change| {
            if !job.include_meta_files && is_housekeeping(&change.relative_path) {
                debug!("Skipping meta file {}", change.relative_path);
                return false;
            }
            matcher.should_include(&change.relative_path)
        })
        .filter(|change| seen.insert(change.relative_path.clone()))
        .collect()
}

fn fetch_stanza<V: VersionControl>(vcs: &V, job: &DiffJob, change: &ChangeRecord) -> Stanza {
    match build_stanza(vcs, job, change) {
        Ok(stanza) => stanza,
        Err(e) => {
            let err = PackerError::PerFileDiffFailed {
                path: change.relative_path.clone(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            Stanza::Failed(e.to_string())
        }
    }
}

fn build_stanza<V: VersionControl>(
    vcs: &V,
    job: &DiffJob,
    change: &ChangeRecord,
) -> PackerResult<Stanza> {
    let source = job.source_branch.as_str();
    let target = job.target_branch.as_str();
    let path = change.relative_path.as_str();

    let info = match change.kind {
        ChangeKind::Deleted => vcs.object_info(source, path)?,
        _ => vcs.object_info(target, path)?,
    };

    let limit_bytes = job.max_file_size_kb.saturating_mul(1024);
    if info.size > limit_bytes {
        debug!("Skipping {} ({} bytes > {} bytes)", path, info.size, limit_bytes);
        return Ok(Stanza::TooLarge {
            size: info.size,
            limit_kb: job.max_file_size_kb,
        });
    }
    if info.binary {
        return Ok(if job.include_binary_files {
            Stanza::Binary { size: info.size }
        } else {
            Stanza::BinarySkipped
        });
    }

    let body = match &change.kind {
        ChangeKind::Added => {
            let content = vcs.show(target, path)?;
            diffstat::synthesize_diff(SynthKind::Added, path, &content)
        }
        ChangeKind::Deleted => {
            let content = vcs.show(source, path)?;
            diffstat::synthesize_diff(SynthKind::Deleted, path, &content)
        }
        ChangeKind::Renamed => {
            let original = change.original_path.as_deref().unwrap_or(path);
            let body = vcs.diff_paths(source, original, target, path)?;
            diffstat::with_rename_header(original, path, &body)
        }
        _ => vcs.diff_paths(source, path, target, path)?,
    };

    let stats = diffstat::parse_stats(&body);
    Ok(Stanza::Content { body, stats })
}

fn render_stanza(out: &mut String, change: &ChangeRecord, stanza: &Stanza) {
    match &change.original_path {
        Some(original) if change.kind == ChangeKind::Renamed => out.push_str(&format!(
            "=== {} (renamed from {}) ===\n",
            change.relative_path, original
        )),
        _ => out.push_str(&format!("=== {} ===\n", change.relative_path)),
    }
    out.push_str(&format!("Status: {}\n", change.kind));

    match stanza {
        Stanza::Content { body, stats } => {
            let has_content = body.lines().any(|l| l.starts_with("@@"));
            if has_content {
                out.push_str(&format!("Changes: +{} -{}\n", stats.additions, stats.deletions));
            }
            out.push('\n');
            if !body.is_empty() {
                out.push_str(body);
                if !body.ends_with('\n') {
                    out.push('\n');
                }
            } else {
                out.push_str("No content changes\n");
            }
        }
        Stanza::TooLarge { size, limit_kb } => {
            out.push_str(&format!(
                "Skipped: too large ({} bytes exceeds the {} KB limit)\n",
                size, limit_kb
            ));
        }
        Stanza::BinarySkipped => out.push_str("Binary file skipped\n"),
        Stanza::Binary { size } => out.push_str(&format!("Binary file ({} bytes)\n", size)),
        Stanza::Failed(reason) => {
            out.push_str(&format!("Error retrieving diff: {}\n", reason));
        }
    }
    out.push_str("=== END FILE ===\n\n");
}

fn render_header(job: &DiffJob, files: usize, now: DateTime<Utc>) -> String {
    let mut header = String::from("--- START OF HEADER ---\n");
    header.push_str(&format!("Generated on: {}\n", timestamp(now)));
    header.push_str(&format!("Generated by: {}\n", GENERATOR));
    header.push_str("Purpose: Git branch diff for analysis\n");
    header.push_str(&format!("Source Branch: {}\n", job.source_branch));
    header.push_str(&format!("Target Branch: {}\n", job.target_branch));
    header.push_str(&format!("Number of Changed Files: {}\n", files));
    header.push_str("--- END OF HEADER ---\n\n");
    header
}

pub fn summary_line(files: usize, totals: DiffStats) -> String {
    format!(
        "Summary: {} files, {} additions(+), {} deletions(-)\n",
        files, totals.additions, totals.deletions
    )
}

/// Writes the report for `job`. The text is buffered in full since its first
/// line carries totals known only at the end.
pub fn generate_diff<V: VersionControl>(
    vcs: &V,
    job: &DiffJob,
    now: DateTime<Utc>,
) -> PackerResult<DiffOutcome> {
    info!(
        "Generating diff between {} and {}",
        job.source_branch, job.target_branch
    );
    let changes = vcs.changes_between(&job.source_branch, &job.target_branch)?;
    if changes.is_empty() {
        info!("No differences found between the branches");
        return Ok(DiffOutcome::NoChanges);
    }
    debug!("Found {} changed files", changes.len());

    let changes = select_changes(changes, job);
    if changes.is_empty() {
        info!("All changed files were filtered out");
        return Ok(DiffOutcome::AllFiltered);
    }

    let mut body = String::new();
    let mut totals = DiffStats::default();
    let mut skipped = 0;
    let mut errors = 0;

    for change in &changes {
        debug!("Processing {} ({})", change.relative_path, change.kind);
        let stanza = fetch_stanza(vcs, job, change);
        match &stanza {
            Stanza::Content { stats, .. } => totals += *stats,
            Stanza::TooLarge { .. } | Stanza::BinarySkipped | Stanza::Binary { .. } => {
                skipped += 1
            }
            Stanza::Failed(_) => errors += 1,
        }
        render_stanza(&mut body, change, &stanza);
    }

    let mut text = summary_line(changes.len(), totals);
    text.push('\n');
    text.push_str(&render_header(job, changes.len(), now));
    text.push_str(&body);

    output::write_all(&job.output_file, &text)?;
    info!(
        "Diff written to {}: {} files, +{} -{}",
        job.output_file.display(),
        changes.len(),
        totals.additions,
        totals.deletions
    );

    Ok(DiffOutcome::Written(DiffReport {
        text,
        output_path: job.output_file.clone(),
        files: changes.len(),
        totals,
        skipped,
        errors,
    }))
}
