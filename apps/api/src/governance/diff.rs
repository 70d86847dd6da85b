//! Line-oriented comparison of two master-prompt versions for operator review.
//!
//! Pure functions only; nothing here reads or writes the ledger.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
}

/// The two admin display modes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    #[default]
    Unified,
    SideBySide,
}

/// One row of the side-by-side view. `None` marks a gap on that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideBySideRow {
    pub left: Option<String>,
    pub right: Option<String>,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionDiff {
    pub from_version: String,
    pub to_version: String,
    pub lines: Vec<DiffLine>,
    pub added: usize,
    pub removed: usize,
}

impl VersionDiff {
    pub fn between(from_version: &str, old: &str, to_version: &str, new: &str) -> Self {
        let lines = line_diff(old, new);
        let added = lines.iter().filter(|l| l.kind == LineKind::Added).count();
        let removed = lines.iter().filter(|l| l.kind == LineKind::Removed).count();
        Self {
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            lines,
            added,
            removed,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// `  `, `- ` and `+ ` prefixed lines under a header naming both versions.
    pub fn unified(&self) -> String {
        let mut out = format!("--- {}\n+++ {}\n", self.from_version, self.to_version);
        for line in &self.lines {
            let prefix = match line.kind {
                LineKind::Context => "  ",
                LineKind::Removed => "- ",
                LineKind::Added => "+ ",
            };
            out.push_str(prefix);
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    /// Pairs each run of removals with the run of additions that follows it.
    pub fn side_by_side(&self) -> Vec<SideBySideRow> {
        let mut rows = Vec::new();
        let mut removed: Vec<&str> = Vec::new();
        let mut added: Vec<&str> = Vec::new();

        for line in &self.lines {
            match line.kind {
                LineKind::Removed => removed.push(&line.text),
                LineKind::Added => added.push(&line.text),
                LineKind::Context => {
                    flush_changes(&mut rows, &mut removed, &mut added);
                    rows.push(SideBySideRow {
                        left: Some(line.text.clone()),
                        right: Some(line.text.clone()),
                        changed: false,
                    });
                }
            }
        }
        flush_changes(&mut rows, &mut removed, &mut added);
        rows
    }
}

fn flush_changes(rows: &mut Vec<SideBySideRow>, removed: &mut Vec<&str>, added: &mut Vec<&str>) {
    let len = removed.len().max(added.len());
    for i in 0..len {
        rows.push(SideBySideRow {
            left: removed.get(i).map(|s| s.to_string()),
            right: added.get(i).map(|s| s.to_string()),
            changed: true,
        });
    }
    removed.clear();
    added.clear();
}

/// Longest-common-subsequence line diff. Removals precede additions within a change.
pub fn line_diff(old: &str, new: &str) -> Vec<DiffLine> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let (n, m) = (old_lines.len(), new_lines.len());

    // dp[i][j] = LCS length of old[i..] and new[j..]
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if old_lines[i] == new_lines[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old_lines[i] == new_lines[j] {
            out.push(line(LineKind::Context, old_lines[i]));
            i += 1;
            j += 1;
        } else if i < n && (j == m || dp[i + 1][j] >= dp[i][j + 1]) {
            out.push(line(LineKind::Removed, old_lines[i]));
            i += 1;
        } else {
            out.push(line(LineKind::Added, new_lines[j]));
            j += 1;
        }
    }
    out
}

fn line(kind: LineKind, text: &str) -> DiffLine {
    DiffLine {
        kind,
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_are_all_context() {
        let diff = VersionDiff::between("Ω_v1.0", "a\nb", "Ω_v1.1", "a\nb");
        assert!(diff.is_identical());
        assert!(diff.lines.iter().all(|l| l.kind == LineKind::Context));
    }

    #[test]
    fn test_replaced_line_shows_removal_then_addition() {
        let lines = line_diff("ROLE: analyst\nETHICS: strict", "ROLE: architect\nETHICS: strict");
        assert_eq!(
            lines,
            vec![
                line(LineKind::Removed, "ROLE: analyst"),
                line(LineKind::Added, "ROLE: architect"),
                line(LineKind::Context, "ETHICS: strict"),
            ]
        );
    }

    #[test]
    fn test_inserted_line_keeps_surrounding_context() {
        let diff = VersionDiff::between("a", "one\nthree", "b", "one\ntwo\nthree");
        assert_eq!(diff.added, 1);
        assert_eq!(diff.removed, 0);
        assert_eq!(diff.lines[1], line(LineKind::Added, "two"));
    }

    #[test]
    fn test_empty_old_text_is_all_additions() {
        let diff = VersionDiff::between("a", "", "b", "x\ny");
        assert_eq!(diff.added, 2);
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn test_unified_rendering_prefixes_lines() {
        let diff = VersionDiff::between("Ω_v1.0", "keep\nold", "Ω_v1.1", "keep\nnew");
        assert_eq!(
            diff.unified(),
            "--- Ω_v1.0\n+++ Ω_v1.1\n  keep\n- old\n+ new\n"
        );
    }

    #[test]
    fn test_side_by_side_pairs_uneven_change_runs() {
        let diff = VersionDiff::between("a", "x\nold1\nold2\ny", "b", "x\nnew1\ny");
        let rows = diff.side_by_side();

        assert_eq!(rows.len(), 4);
        assert!(!rows[0].changed);
        assert_eq!(rows[1].left.as_deref(), Some("old1"));
        assert_eq!(rows[1].right.as_deref(), Some("new1"));
        assert_eq!(rows[2].left.as_deref(), Some("old2"));
        assert_eq!(rows[2].right, None);
        assert_eq!(rows[3].left.as_deref(), Some("y"));
    }
}
