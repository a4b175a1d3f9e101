//! Unified diff generation for canvas content.
//!
//! Merge nodes optionally carry a diff of the source ref's canvas against
//! the target's latest canvas so reviewers can adopt the source content
//! later without replaying history.

use std::fmt::Write;

use similar::{Algorithm, ChangeTag, TextDiff};

/// Inputs above this size are summarized instead of diffed.
const MAX_DIFF_INPUT_BYTES: usize = 1 << 20;

/// Unified diff of `old` against `new` with conventional `---`/`+++`
/// headers, or `None` when the contents are identical.
pub fn unified_canvas_diff(old_label: &str, new_label: &str, old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }
    if old.len() > MAX_DIFF_INPUT_BYTES || new.len() > MAX_DIFF_INPUT_BYTES {
        return Some(format!(
            "Canvas changed ({} -> {} bytes); content too large to diff",
            old.len(),
            new.len()
        ));
    }

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);

    let mut out = String::new();
    let _ = writeln!(out, "--- {old_label}");
    let _ = writeln!(out, "+++ {new_label}");
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        let _ = writeln!(out, "{}", hunk.header());
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
                ChangeTag::Equal => ' ',
            };
            let _ = write!(out, "{}{}", sign, change.value());
            if !change.value().ends_with('\n') {
                let _ = writeln!(out);
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_yields_none() {
        assert!(unified_canvas_diff("a", "b", "same\n", "same\n").is_none());
    }

    #[test]
    fn test_single_line_change() {
        let out = unified_canvas_diff("target", "source", "# Plan\nA\n", "# Plan\nB\n").unwrap();
        assert!(out.starts_with("--- target\n+++ source\n"));
        assert!(out.contains("-A"));
        assert!(out.contains("+B"));
        assert!(out.contains(" # Plan"));
    }

    #[test]
    fn test_addition_from_empty() {
        let out = unified_canvas_diff("target", "source", "", "hello\n").unwrap();
        assert!(out.contains("+hello"));
    }

    #[test]
    fn test_oversized_input_summarized() {
        let big = "x".repeat(MAX_DIFF_INPUT_BYTES + 1);
        let out = unified_canvas_diff("a", "b", "", &big).unwrap();
        assert!(out.contains("too large to diff"));
    }
}
