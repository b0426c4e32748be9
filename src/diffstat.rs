use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

impl DiffStats {
    pub fn new(additions: usize, deletions: usize) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

impl AddAssign for DiffStats {
    fn add_assign(&mut self, rhs: Self) {
        self.additions += rhs.additions;
        self.deletions += rhs.deletions;
    }
}

/// Which side a synthesized diff represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthKind {
    Added,
    Deleted,
}

/// Remaining line budget of the hunk being read.
#[derive(Debug, Clone, Copy)]
enum HunkState {
    Outside,
    Counted { old: usize, new: usize },
    Untracked,
}

/// Parses `@@ -a,b +c,d @@` into `(b, d)`. A missing count means one line.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let mut ranges = rest[..end].split_whitespace();
    let old = ranges.next()?.strip_prefix('-')?;
    let new = ranges.next()?.strip_prefix('+')?;

    fn count(range: &str) -> Option<usize> {
        match range.split_once(',') {
            Some((_, n)) => n.parse().ok(),
            None => range.parse::<usize>().ok().map(|_| 1),
        }
    }

    Some((count(old)?, count(new)?))
}

fn is_file_header(line: &str) -> bool {
    line.starts_with("diff --git")
        || line.starts_with("index ")
        || line.starts_with("--- ")
        || line.starts_with("+++ ")
}

/// Counts added and removed lines. Nothing before the first `@@` is counted.
pub fn parse_stats(diff: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    let mut state = HunkState::Outside;

    for line in diff.lines() {
        if let HunkState::Counted { old, new } = state {
            if old > 0 || new > 0 {
                state = match line.as_bytes().first() {
                    Some(b'+') => {
                        stats.additions += 1;
                        HunkState::Counted { old, new: new.saturating_sub(1) }
                    }
                    Some(b'-') => {
                        stats.deletions += 1;
                        HunkState::Counted { old: old.saturating_sub(1), new }
                    }
                    Some(b'\\') => state,
                    _ => HunkState::Counted {
                        old: old.saturating_sub(1),
                        new: new.saturating_sub(1),
                    },
                };
                continue;
            }
            if line.starts_with('\\') {
                continue;
            }
            state = HunkState::Outside;
        }

        if line.starts_with("@@") {
            state = match parse_hunk_header(line) {
                Some((old, new)) => HunkState::Counted { old, new },
                None => HunkState::Untracked,
            };
            continue;
        }

        match state {
            HunkState::Outside | HunkState::Counted { .. } => {}
            HunkState::Untracked => {
                if is_file_header(line) {
                    continue;
                }
                if line.starts_with('+') && !line.starts_with("+++") {
                    stats.additions += 1;
                } else if line.starts_with('-') && !line.starts_with("---") {
                    stats.deletions += 1;
                }
            }
        }
    }

    stats
}

/// Builds a unified diff for a file that exists on only one side.
pub fn synthesize_diff(kind: SynthKind, relative_path: &str, content: &str) -> String {
    // Split on '\n' only so CRLF files keep their '\r'.
    let mut lines: Vec<&str> = content.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    let n = lines.len();
    let mut out = format!("diff --git a/{0} b/{0}\n", relative_path);

    let (mode, old, new, hunk, prefix) = match kind {
        SynthKind::Added => (
            "new file mode 100644",
            "/dev/null".to_string(),
            format!("b/{}", relative_path),
            format!("@@ -0,0 +1,{} @@", n),
            '+',
        ),
        SynthKind::Deleted => (
            "deleted file mode 100644",
            format!("a/{}", relative_path),
            "/dev/null".to_string(),
            format!("@@ -1,{} +0,0 @@", n),
            '-',
        ),
    };

    out.push_str(mode);
    out.push('\n');
    out.push_str(&format!("--- {}\n+++ {}\n", old, new));
    if n == 0 {
        return out;
    }
    out.push_str(&hunk);
    out.push('\n');
    for line in lines {
        out.push(prefix);
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Prefixes a diff body with git's rename lines.
pub fn with_rename_header(original_path: &str, relative_path: &str, body: &str) -> String {
    let mut out = format!(
        "rename from {}\nrename to {}\n",
        original_path, relative_path
    );
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFIED: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 83db48f..bf269f4 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,4 +1,5 @@
 fn a() {}
-fn b() {}
+fn b() -> u8 { 1 }
+fn c() {}
 fn d() {}
 fn e() {}
";

    #[test]
    fn counts_lines_inside_hunks_only() {
        assert_eq!(parse_stats(MODIFIED), DiffStats::new(2, 1));
    }

    #[test]
    fn ignores_header_lines_before_first_hunk() {
        let diff = "--- a/x\n+++ b/x\n-not counted\n+not counted\n";
        assert_eq!(parse_stats(diff), DiffStats::default());
    }

    #[test]
    fn handles_multiple_files_and_hunks() {
        let diff = format!(
            "{}diff --git a/b b/b\n--- a/b\n+++ b/b\n@@ -1 +1 @@\n-x\n+y\n@@ -10,2 +10,1 @@\n-gone\n kept\n",
            MODIFIED
        );
        assert_eq!(parse_stats(&diff), DiffStats::new(3, 3));
    }

    #[test]
    fn content_that_looks_like_headers_is_still_counted() {
        let diff = "@@ -0,0 +1,2 @@\n+++ not a header\n+--- nor this\n";
        assert_eq!(parse_stats(diff), DiffStats::new(2, 0));
    }

    #[test]
    fn no_newline_marker_is_not_counted() {
        let diff = "@@ -1 +1 @@\n-old\n\\ No newline at end of file\n+new\n\\ No newline at end of file\n";
        assert_eq!(parse_stats(diff), DiffStats::new(1, 1));
    }

    #[test]
    fn malformed_hunk_header_falls_back_to_prefix_rule() {
        let diff = "@@ weird @@\n+a\n-b\n+++ b/x\n+c\n";
        assert_eq!(parse_stats(diff), DiffStats::new(2, 1));
    }

    #[test]
    fn synthesized_added_diff_round_trips() {
        let content = "one\n+two\n++three\n\nfive\n";
        let diff = synthesize_diff(SynthKind::Added, "notes.txt", content);
        assert!(diff.contains("new file mode 100644\n--- /dev/null\n+++ b/notes.txt\n@@ -0,0 +1,5 @@\n"));
        assert_eq!(parse_stats(&diff), DiffStats::new(5, 0));
    }

    #[test]
    fn synthesized_deleted_diff_round_trips() {
        let content = "alpha\n--beta\ngamma";
        let diff = synthesize_diff(SynthKind::Deleted, "old.txt", content);
        assert!(diff.contains("deleted file mode 100644\n--- a/old.txt\n+++ /dev/null\n@@ -1,3 +0,0 @@\n"));
        assert!(diff.ends_with("-gamma\n"));
        assert_eq!(parse_stats(&diff), DiffStats::new(0, 3));
    }

    #[test]
    fn synthesized_diff_keeps_crlf_line_endings() {
        let diff = synthesize_diff(SynthKind::Added, "win.txt", "one\r\ntwo\r\nthree");
        assert!(diff.ends_with("@@ -0,0 +1,3 @@\n+one\r\n+two\r\n+three\n"));
        assert_eq!(parse_stats(&diff), DiffStats::new(3, 0));
    }

    #[test]
    fn empty_file_has_no_hunk() {
        let diff = synthesize_diff(SynthKind::Added, "empty", "");
        assert!(!diff.contains("@@"));
        assert_eq!(parse_stats(&diff), DiffStats::default());
    }

    #[test]
    fn rename_header_keeps_body_stats() {
        let diff = with_rename_header("old/name.rs", "new/name.rs", MODIFIED);
        assert!(diff.starts_with("rename from old/name.rs\nrename to new/name.rs\n"));
        assert_eq!(parse_stats(&diff), DiffStats::new(2, 1));
    }
}
