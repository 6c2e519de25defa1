//! Line-level diffs for file mutations.
//!
//! Agents get back a compact unified-style diff with addition/deletion
//! counts so they can confirm an edit did what they intended without
//! re-reading the whole file.

use serde::{Deserialize, Serialize};

/// Cap on rendered diff lines; counts always cover the full change.
const MAX_DIFF_LINES: usize = 100;
/// Cap on rendered lines for newly created files.
const MAX_NEW_FILE_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub additions: usize,
    pub deletions: usize,
    pub diff: String,
}

/// Build a diff between the old and new content of `path`.
pub fn generate_diff(path: &str, old: &str, new: &str) -> FileDiff {
    if old.is_empty() {
        let lines: Vec<&str> = new.lines().collect();
        let rendered: String = lines
            .iter()
            .take(MAX_NEW_FILE_LINES)
            .map(|l| format!("+{l}\n"))
            .collect();
        return FileDiff {
            path: path.to_string(),
            kind: ChangeKind::Created,
            additions: lines.len(),
            deletions: 0,
            diff: format!("+++ {path} (new file)\n{rendered}"),
        };
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_lines(&old_lines, &new_lines);

    let additions = ops.iter().filter(|op| matches!(op, Op::Add(_))).count();
    let deletions = ops.iter().filter(|op| matches!(op, Op::Del(_))).count();

    let mut rendered = format!("--- a/{path}\n+++ b/{path}\n");
    let mut emitted = 0;
    for op in &ops {
        if emitted >= MAX_DIFF_LINES {
            rendered.push_str("... (diff truncated)\n");
            break;
        }
        match op {
            // Unchanged lines are omitted; the counts carry the signal.
            Op::Keep => continue,
            Op::Add(line) => rendered.push_str(&format!("+{line}\n")),
            Op::Del(line) => rendered.push_str(&format!("-{line}\n")),
        }
        emitted += 1;
    }

    FileDiff {
        path: path.to_string(),
        kind: ChangeKind::Modified,
        additions,
        deletions,
        diff: rendered,
    }
}

enum Op<'a> {
    Keep,
    Add(&'a str),
    Del(&'a str),
}

/// LCS-based line diff. Quadratic in line count, which is fine for the file
/// sizes agents edit; pathological inputs are bounded by the render cap.
fn diff_lines<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let n = old.len();
    let m = new.len();
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Keep);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Del(old[i]));
            i += 1;
        } else {
            ops.push(Op::Add(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|&l| Op::Del(l)));
    ops.extend(new[j..].iter().map(|&l| Op::Add(l)));
    ops
}
