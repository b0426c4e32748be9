use crate::error::{PackerError, PackerResult};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Bytes inspected when deciding whether a blob is binary, matching git.
const BINARY_SNIFF_LEN: u64 = 8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Untracked,
    Ignored,
    Other(String),
}

impl ChangeKind {
    pub fn from_status(code: &str) -> Self {
        match code.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('D') => ChangeKind::Deleted,
            Some('M') => ChangeKind::Modified,
            Some('R') => ChangeKind::Renamed,
            Some('?') => ChangeKind::Untracked,
            Some('!') => ChangeKind::Ignored,
            _ => ChangeKind::Other(code.to_string()),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => f.write_str("Added"),
            ChangeKind::Deleted => f.write_str("Deleted"),
            ChangeKind::Modified => f.write_str("Modified"),
            ChangeKind::Renamed => f.write_str("Renamed"),
            ChangeKind::Untracked => f.write_str("Untracked"),
            ChangeKind::Ignored => f.write_str("Ignored"),
            ChangeKind::Other(code) => write!(f, "Status {}", code),
        }
    }
}

/// One changed path between two refs. `relative_path` is the new path for renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub original_path: Option<String>,
}

impl ChangeRecord {
    pub fn new(relative_path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind,
            original_path: None,
        }
    }

    pub fn renamed(original_path: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: ChangeKind::Renamed,
            original_path: Some(original_path.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub binary: bool,
}

pub trait VersionControl {
    fn list_branches(&self) -> PackerResult<Vec<String>>;
    /// Files that differ going from `old_rev` to `new_rev`.
    fn changes_between(&self, old_rev: &str, new_rev: &str) -> PackerResult<Vec<ChangeRecord>>;
    /// Content of `path` as of `rev`.
    fn show(&self, rev: &str, path: &str) -> PackerResult<String>;
    /// Unified diff of one file between two refs; the paths differ for renames.
    fn diff_paths(
        &self,
        old_rev: &str,
        old_path: &str,
        new_rev: &str,
        new_path: &str,
    ) -> PackerResult<String>;
    fn object_info(&self, rev: &str, path: &str) -> PackerResult<ObjectInfo>;
}

/// Parses `git diff --name-status -z` output.
pub fn parse_name_status(raw: &str) -> Vec<ChangeRecord> {
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    let mut changes = Vec::new();

    while let Some(status) = fields.next() {
        let kind = ChangeKind::from_status(status);
        let two_paths = status.starts_with('R') || status.starts_with('C');
        let Some(first) = fields.next() else {
            break;
        };
        if two_paths {
            let Some(second) = fields.next() else {
                break;
            };
            if kind == ChangeKind::Renamed {
                changes.push(ChangeRecord::renamed(first, second));
            } else {
                changes.push(ChangeRecord::new(second, kind));
            }
        } else {
            changes.push(ChangeRecord::new(first, kind));
        }
    }

    changes
}

/// Walks up from `start_path` until a directory containing `.git` is found.
pub fn find_git_root(start_path: &Path) -> PackerResult<Option<PathBuf>> {
    let mut current_path = fs::canonicalize(start_path)
        .map_err(|_| PackerError::NoWorkspaceRoot(start_path.to_path_buf()))?;

    loop {
        if current_path.join(".git").exists() {
            return Ok(Some(current_path));
        }
        if !current_path.pop() {
            return Ok(None);
        }
    }
}

/// [`VersionControl`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn discover(start_path: &Path) -> PackerResult<Self> {
        match find_git_root(start_path)? {
            Some(root) => {
                debug!("Git repository root: {}", root.display());
                Ok(Self { root })
            }
            None => Err(PackerError::NoRepositoryFound(start_path.to_path_buf())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root);
        cmd
    }

    fn run(&self, args: &[&str]) -> PackerResult<Vec<u8>> {
        debug!("git {}", args.join(" "));
        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| PackerError::Git(format!("Failed to execute git: {}", e)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(PackerError::Git(format!(
                "'git {}' failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn run_text(&self, args: &[&str]) -> PackerResult<String> {
        self.run(args)
            .map(|out| String::from_utf8_lossy(&out).into_owned())
    }

    fn looks_binary(&self, object: &str) -> PackerResult<bool> {
        let mut child = self
            .command()
            .args(["cat-file", "blob", object])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PackerError::Git(format!("Failed to execute git: {}", e)))?;

        let mut head = Vec::new();
        let read = match child.stdout.take() {
            Some(stdout) => stdout.take(BINARY_SNIFF_LEN).read_to_end(&mut head).map(|_| ()),
            None => Ok(()),
        };
        // The rest of the blob is not needed.
        let _ = child.kill();
        let _ = child.wait();

        read.map_err(|e| PackerError::Git(format!("Failed to read {}: {}", object, e)))?;
        Ok(head.contains(&0))
    }
}

impl VersionControl for GitCli {
    fn list_branches(&self) -> PackerResult<Vec<String>> {
        let out = self.run_text(&[
            "for-each-ref",
            "--format=%(refname:short)",
            "refs/heads",
            "refs/remotes",
        ])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn changes_between(&self, old_rev: &str, new_rev: &str) -> PackerResult<Vec<ChangeRecord>> {
        let out = self.run_text(&["diff", "--no-color", "--name-status", "-z", "-M", old_rev, new_rev])?;
        Ok(parse_name_status(&out))
    }

    fn show(&self, rev: &str, path: &str) -> PackerResult<String> {
        self.run_text(&["show", &format!("{}:{}", rev, path)])
    }

    fn diff_paths(
        &self,
        old_rev: &str,
        old_path: &str,
        new_rev: &str,
        new_path: &str,
    ) -> PackerResult<String> {
        if old_path == new_path {
            self.run_text(&["diff", "--no-color", "--no-ext-diff", old_rev, new_rev, "--", new_path])
        } else {
            self.run_text(&[
                "diff",
                "--no-color",
                "--no-ext-diff",
                &format!("{}:{}", old_rev, old_path),
                &format!("{}:{}", new_rev, new_path),
            ])
        }
    }

    fn object_info(&self, rev: &str, path: &str) -> PackerResult<ObjectInfo> {
        let object = format!("{}:{}", rev, path);
        let size_text = self.run_text(&["cat-file", "-s", &object])?;
        let size = size_text.trim().parse::<u64>().map_err(|e| {
            PackerError::Git(format!("Unexpected size '{}' for {}: {}", size_text.trim(), object, e))
        })?;
        let binary = self.looks_binary(&object)?;
        Ok(ObjectInfo { size, binary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_status_parses_all_record_shapes() {
        let raw = "M\0src/lib.rs\0A\0new.txt\0R087\0old/name.rs\0new/name.rs\0D\0gone.md\0T\0link\0";
        let changes = parse_name_status(raw);
        assert_eq!(
            changes,
            vec![
                ChangeRecord::new("src/lib.rs", ChangeKind::Modified),
                ChangeRecord::new("new.txt", ChangeKind::Added),
                ChangeRecord::renamed("old/name.rs", "new/name.rs"),
                ChangeRecord::new("gone.md", ChangeKind::Deleted),
                ChangeRecord::new("link", ChangeKind::Other("T".to_string())),
            ]
        );
    }

    #[test]
    fn copies_use_the_destination_path() {
        let changes = parse_name_status("C100\0a.txt\0b.txt\0");
        assert_eq!(changes, vec![ChangeRecord::new("b.txt", ChangeKind::Other("C100".to_string()))]);
    }

    #[test]
    fn truncated_output_is_tolerated() {
        assert!(parse_name_status("").is_empty());
        assert!(parse_name_status("M\0").is_empty());
        assert!(parse_name_status("R100\0only-one\0").is_empty());
    }

    #[test]
    fn status_text_matches_report_wording() {
        assert_eq!(ChangeKind::Added.to_string(), "Added");
        assert_eq!(ChangeKind::Other("X".into()).to_string(), "Status X");
    }

    #[test]
    fn git_root_is_found_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();

        let root = find_git_root(&dir.path().join("a/b")).unwrap().unwrap();
        assert_eq!(root, fs::canonicalize(dir.path()).unwrap());
    }
}
